use blobdir_directory::{Config, Directory};
use blobdir_store::memory::Store;
use criterion::criterion_main;

mod write_sequential;

criterion_main!(write_sequential::benches, read_random::benches);

/// Size of every file written by the benchmarks.
const FILE_SIZE: usize = 8 * 1024 * 1024;

/// Open a directory over a fresh in-memory store.
fn directory() -> Directory<Store> {
    Directory::new(Store::default(), Config::new("bench")).unwrap()
}
