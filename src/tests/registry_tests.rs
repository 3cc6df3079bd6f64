use crate::bus::i2c_sim::{SimulatedBus, SimulatedI2c};
use crate::bus::{I2CError, TransportRegistry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

fn counting_registry(buses: &[u8]) -> (TransportRegistry, Arc<AtomicUsize>) {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();
    let sim = SimulatedBus::shared();
    let registry = TransportRegistry::new(buses, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Box::new(SimulatedI2c::new(sim.clone()))
    });
    (registry, created)
}

#[test]
fn one_transport_per_bus_across_threads() {
    let (registry, created) = counting_registry(&[0, 1]);
    let barrier = Barrier::new(8);
    let (registry, barrier) = (&registry, &barrier);

    let transports = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(move || {
                    barrier.wait();
                    registry.get(1).unwrap()
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
    });

    assert_eq!(created.load(Ordering::SeqCst), 1);
    for transport in &transports {
        assert!(Arc::ptr_eq(transport, &transports[0]));
    }
    assert!(transports[0].lock().is_open());
}

#[test]
fn separate_buses_get_separate_transports() {
    let (registry, created) = counting_registry(&[0, 1]);
    let zero = registry.get(0).unwrap();
    let one = registry.get(1).unwrap();

    assert!(!Arc::ptr_eq(&zero, &one));
    assert_eq!(zero.lock().bus_id(), 0);
    assert_eq!(one.lock().bus_id(), 1);
    assert_eq!(created.load(Ordering::SeqCst), 2);
    assert_eq!(registry.open_buses(), vec![0, 1]);
}

#[test]
fn unsupported_bus() {
    let (registry, created) = counting_registry(&[0, 1]);

    assert!(matches!(registry.get(7), Err(I2CError::BusNotFound(7))));
    assert!(!registry.supports(7));
    assert_eq!(created.load(Ordering::SeqCst), 0);
    assert!(registry.open_buses().is_empty());
}

#[test]
fn unavailable_bus_handed_out_closed() {
    let sim = SimulatedBus::shared();
    sim.lock().faults.refuse_open = true;
    let mut buses = HashMap::new();
    buses.insert(3, sim);
    let registry = TransportRegistry::simulated(buses);

    let transport = registry.get(3).unwrap();
    assert!(!transport.lock().is_open());
}

#[test]
fn simulated_supported_buses_sorted() {
    let mut buses = HashMap::new();
    buses.insert(4, SimulatedBus::shared());
    buses.insert(2, SimulatedBus::shared());
    buses.insert(9, SimulatedBus::shared());
    let registry = TransportRegistry::simulated(buses);

    assert_eq!(registry.supported_buses(), &[2, 4, 9]);
}

#[test]
fn close_refused_while_in_use() {
    let (registry, created) = counting_registry(&[0]);
    let transport = registry.get(0).unwrap();

    assert_eq!(registry.close(0), Err(I2CError::BusBusy(0)));
    drop(transport);
    assert_eq!(registry.close(0), Ok(()));
    assert_eq!(registry.close(0), Err(I2CError::BusNotFound(0)));

    // the next request creates a fresh one
    registry.get(0).unwrap();
    assert_eq!(created.load(Ordering::SeqCst), 2);
}
