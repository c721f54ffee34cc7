//! The city scene rendered under the effect chain.

pub mod city;
pub mod color;
pub mod driver;
pub mod graph;
pub mod raster;
pub mod vehicles;
