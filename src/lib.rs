pub mod cache;
pub mod canon;
pub mod fingerprint;
pub mod graph;
pub mod load;
pub mod make;
pub mod parse;
pub mod process;
pub mod run;

#[cfg(not(any(windows, target_arch = "wasm32")))]
use jemallocator::Jemalloc;

#[cfg(not(any(windows, target_arch = "wasm32")))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;
