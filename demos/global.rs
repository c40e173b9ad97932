use zonalloc::{Config, SizeClass, ZoneAllocator};

#[global_allocator]
static ALLOCATOR: ZoneAllocator = ZoneAllocator::with_default_config();

fn print_zones(moment: &str) {
    let stats = ALLOCATOR.stats();
    println!(
        "{moment}: {} zones, {} bytes mapped, {} of {} blocks in use",
        stats.zones, stats.mapped_bytes, stats.used_blocks, stats.blocks
    );
}

fn main() {
    let config = Config::DEFAULT;
    print_zones("Start");

    // One request per size class. Tiny and small ones land in shared zones,
    // the large one gets a zone of its own.
    let sizes = [config.tiny_limit, config.small_limit, config.small_limit * 16];
    let buffers: Vec<Vec<u8>> = sizes
        .iter()
        .map(|&size| {
            let buffer = vec![0xA5; size];
            println!(
                "{:<5} {size:>6} bytes at {:?}",
                SizeClass::of(size, &config),
                buffer.as_ptr()
            );
            buffer
        })
        .collect();
    print_zones("After one request per class");

    // Plenty of tiny requests from another thread, they fit in the tiny zone
    // that already exists.
    std::thread::spawn(|| {
        let boxes: Vec<Box<[u8; 32]>> = (0..64).map(|_| Box::new([7; 32])).collect();
        println!("Second thread boxed {} tiny arrays", boxes.len());
    })
    .join()
    .unwrap();
    print_zones("After the second thread");

    // Growing a vector goes through realloc, which merges with free neighbours
    // whenever it can instead of moving.
    let mut grow: Vec<u64> = Vec::with_capacity(4);
    let first = grow.as_ptr();
    grow.extend(0..512);
    println!("Grew a Vec from {first:?} to {:?}", grow.as_ptr());

    drop(buffers);
    drop(grow);
    print_zones("After dropping everything");

    // The report takes the allocator lock and never allocates, so it works
    // even though this allocator serves the whole program.
    ALLOCATOR.report(false);
}
