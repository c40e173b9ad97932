use std::ptr;

fn alloc(size: usize) -> *mut u8 {
    let address = zonalloc::allocate(size);
    println!("allocate({size}) -> {address:?}");

    for i in 0..size {
        unsafe { *address.add(i) = i as u8 };
    }

    address
}

fn main() {
    unsafe {
        zonalloc::release(alloc(2));
        alloc(2);
        alloc(0);
        alloc(4);

        let mut address = alloc(8);
        for size in [12, 2, 32, 64, 8004, 2, 8004] {
            address = zonalloc::reallocate(address, size);
            println!("reallocate(.., {size}) -> {address:?}");
        }

        zonalloc::release(alloc(10));

        let zeroed = zonalloc::zeroed_allocate(4, 100);
        println!("zeroed_allocate(4, 100) -> {zeroed:?}");

        let overflow = zonalloc::zeroed_allocate(usize::MAX, 2);
        assert_eq!(overflow, ptr::null_mut());
        println!("zeroed_allocate(usize::MAX, 2) -> {overflow:?}");
    }

    zonalloc::report(false);
    println!();
    zonalloc::report(true);

    zonalloc::reset_all();
    println!("\nAfter reset_all:");
    zonalloc::report(false);
}
