
#[cfg(not(feature = "loom"))]
mod correctness;
