// Application layer: one pipeline per published dataset.

pub mod pipelines;
