//! Human readable dump of every zone and block. Nothing in here allocates, the
//! report might be written while this crate is the global allocator and the
//! lock is held.

use std::{
    io::{self, Write},
    ptr::NonNull,
};

use crate::{
    block::{Block, BLOCK_HEADER_SIZE},
    header::Header,
    heap::Heap,
    list::LinkedList,
    zone::{SizeClass, Zone},
};

/// Bytes per hex dump line.
const HEXDUMP_WIDTH: usize = 16;

/// Iterates over zones sorted by start address without touching the zone
/// list. Each step picks the lowest address above the previous one, which
/// is quadratic but doesn't need any memory and zone counts stay small.
struct ZonesByAddress<'a> {
    zones: &'a LinkedList<Zone>,
    last: Option<usize>,
}

impl<'a> ZonesByAddress<'a> {
    fn new(zones: &'a LinkedList<Zone>) -> Self {
        Self { zones, last: None }
    }
}

impl Iterator for ZonesByAddress<'_> {
    type Item = NonNull<Header<Zone>>;

    fn next(&mut self) -> Option<Self::Item> {
        let last = self.last;

        let next = unsafe {
            self.zones
                .iter()
                .filter(|zone| last.map_or(true, |last| zone.as_ref().start() > last))
                .min_by_key(|zone| zone.as_ref().start())?
        };

        self.last = Some(unsafe { next.as_ref().start() });

        Some(next)
    }
}

/// Writes the report. Zones are listed by address, each followed by its
/// blocks:
///
/// ```text
/// ZONE 0x7f3a1c000000 - 0x7f3a1c004000 : 16384 bytes
///   TINY  0x7f3a1c000020 - 0x7f3a1c000060 : 0x7f3a1c000040 : 32 bytes : used
///   LARGE 0x7f3a1c000060 - 0x7f3a1c004000 : 0x7f3a1c000080 : 16256 bytes : free
/// Total : 32 bytes
/// ```
///
/// With `hexdump`, the content of every used block follows its line.
pub(crate) fn write_report<W: Write>(heap: &Heap, out: &mut W, hexdump: bool) -> io::Result<()> {
    let mut total = 0;

    for zone in ZonesByAddress::new(&heap.zones) {
        let zone = unsafe { zone.as_ref() };

        writeln!(
            out,
            "ZONE {:#x} - {:#x} : {} bytes",
            zone.start(),
            zone.end(),
            zone.total_size()
        )?;

        for block in unsafe { zone.data.blocks.iter() } {
            write_block(heap, out, block)?;

            let block_ref = unsafe { block.as_ref() };
            if !block_ref.is_free() {
                total += block_ref.size();

                if hexdump {
                    let content = unsafe { Header::content_address_of(block) };
                    write_hexdump(out, content, block_ref.size())?;
                }
            }
        }
    }

    writeln!(out, "Total : {} bytes", total)
}

fn write_block<W: Write>(heap: &Heap, out: &mut W, block: NonNull<Header<Block>>) -> io::Result<()> {
    let start = block.as_ptr() as usize;
    let block = unsafe { block.as_ref() };
    let class = SizeClass::of(block.size(), &heap.config);

    writeln!(
        out,
        "  {:<5} {:#x} - {:#x} : {:#x} : {} bytes : {}",
        class,
        start,
        start + block.total_size(),
        start + BLOCK_HEADER_SIZE,
        block.size(),
        if block.is_free() { "free" } else { "used" }
    )
}

/// Classic hex dump, one line per [`HEXDUMP_WIDTH`] bytes prefixed with the
/// address of the first byte.
fn write_hexdump<W: Write>(out: &mut W, content: NonNull<u8>, size: usize) -> io::Result<()> {
    let bytes = unsafe { std::slice::from_raw_parts(content.as_ptr(), size) };

    for (i, line) in bytes.chunks(HEXDUMP_WIDTH).enumerate() {
        write!(out, "    {:#x} ", content.as_ptr() as usize + i * HEXDUMP_WIDTH)?;
        for byte in line {
            write!(out, " {:02x}", byte)?;
        }
        writeln!(out)?;
    }

    Ok(())
}
