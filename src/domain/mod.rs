// Domain layer: table model and ports. No I/O here.

pub mod model;
pub mod ports;
