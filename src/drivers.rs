pub mod pca9685; // Pca9685
