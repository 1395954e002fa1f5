pub mod accumulator;
pub mod backpressure;
