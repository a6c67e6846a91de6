use std::cmp;
use std::fmt;
use std::io;

use log::{debug, trace};
use serde::{Serialize, Serializer};

use crate::error::{Error, FreeFault, Result};
use crate::memory::config::{AllocationStrategy, PoolCapacity, PoolConfig};

/// Allocation state of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockState {
    Free,
    Allocated,
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockState::Free => write!(f, "FREE"),
            BlockState::Allocated => write!(f, "ALLOCATED"),
        }
    }
}

/// Size of a block.
///
/// Only the last block of an unbounded pool is `Unbounded`; every block before
/// it has a finite size, so offsets stay finite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extent {
    Bytes(usize),
    Unbounded,
}

impl Extent {
    /// Finite size in bytes, if any
    pub fn bytes(&self) -> Option<usize> {
        match self {
            Extent::Bytes(bytes) => Some(*bytes),
            Extent::Unbounded => None,
        }
    }

    fn fits(&self, size: usize) -> bool {
        match self {
            Extent::Bytes(bytes) => *bytes >= size,
            Extent::Unbounded => true,
        }
    }

    /// Leftover space after placing `size`; `None` means unlimited
    fn slack(&self, size: usize) -> Option<usize> {
        self.bytes().map(|bytes| bytes - size)
    }

    fn shrink(&mut self, size: usize) {
        if let Extent::Bytes(bytes) = self {
            *bytes -= size;
        }
    }

    fn absorb(self, other: Extent) -> Extent {
        match (self, other) {
            (Extent::Bytes(a), Extent::Bytes(b)) => Extent::Bytes(a + b),
            _ => Extent::Unbounded,
        }
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extent::Bytes(bytes) => write!(f, "{}", bytes),
            Extent::Unbounded => write!(f, "unbounded"),
        }
    }
}

impl Serialize for Extent {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Extent::Bytes(bytes) => serializer.serialize_u64(*bytes as u64),
            Extent::Unbounded => serializer.serialize_str("unbounded"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Block {
    extent: Extent,
    state: BlockState,
}

impl Block {
    fn new(extent: Extent, state: BlockState) -> Self {
        Self { extent, state }
    }

    fn is_free(&self) -> bool {
        self.state == BlockState::Free
    }
}

/// One block as seen from outside the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    /// Start of the block in the pool
    pub offset: usize,
    /// Size of the block
    pub size: Extent,
    /// Allocation state
    pub state: BlockState,
}

/// Read-only snapshot of the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolReport {
    /// Blocks in ascending offset order
    pub blocks: Vec<BlockInfo>,
    /// Largest `offset + size` ever handed out
    pub high_water_mark: usize,
    /// Bytes currently allocated
    pub allocated_bytes: usize,
}

impl PoolReport {
    /// Serialize the report as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Number of free blocks
    pub fn free_block_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.state == BlockState::Free).count()
    }
}

impl fmt::Display for PoolReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in &self.blocks {
            writeln!(f, "size={}, {}", block.size, block.state)?;
        }
        Ok(())
    }
}

/// Free-list manager for a single memory pool.
///
/// The pool is an ordered run of blocks starting at offset 0. A block's offset
/// is the sum of the sizes of the blocks before it, so splitting and merging
/// only ever touch adjacent entries of the list.
#[derive(Debug, Clone)]
pub struct MemoryManager {
    config: PoolConfig,
    blocks: Vec<Block>,
    high_water_mark: usize,
    allocated_bytes: usize,
}

impl MemoryManager {
    /// Create a new manager from a validated config
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let initial = match config.capacity {
            PoolCapacity::Unbounded => Extent::Unbounded,
            PoolCapacity::Fixed(bytes) => Extent::Bytes(bytes),
        };

        Ok(Self {
            config,
            blocks: vec![Block::new(initial, BlockState::Free)],
            high_water_mark: 0,
            allocated_bytes: 0,
        })
    }

    /// Unbounded best-fit pool with the given alignment quantum
    pub fn with_alignment(alignment: usize) -> Result<Self> {
        Self::new(PoolConfig::new().set_alignment(alignment))
    }

    pub fn alignment(&self) -> usize {
        self.config.alignment
    }

    pub fn strategy(&self) -> AllocationStrategy {
        self.config.strategy
    }

    pub fn capacity(&self) -> PoolCapacity {
        self.config.capacity
    }

    /// Largest `offset + size` over every allocation issued so far
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// Bytes held by allocated blocks right now
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Reserve `size` bytes and return the offset of the reservation
    pub fn allocate(&mut self, size: usize) -> Result<usize> {
        let size = Self::align(size, self.config.alignment)
            .ok_or(Error::OutOfMemory { requested: size })?;

        let found = match self.config.strategy {
            AllocationStrategy::FirstFit => self.first_fit(size),
            AllocationStrategy::BestFit => self.best_fit(size),
        };
        let (index, offset) = found.ok_or(Error::OutOfMemory { requested: size })?;
        let end = offset
            .checked_add(size)
            .ok_or(Error::OutOfMemory { requested: size })?;

        let block = &mut self.blocks[index];
        if block.extent == Extent::Bytes(size) {
            // exact fit
            block.state = BlockState::Allocated;
        } else {
            block.extent.shrink(size);
            self.blocks
                .insert(index, Block::new(Extent::Bytes(size), BlockState::Allocated));
        }

        self.high_water_mark = cmp::max(self.high_water_mark, end);
        self.allocated_bytes += size;
        debug!(
            "allocated {} bytes at offset {} ({}, high water {})",
            size, offset, self.config.strategy, self.high_water_mark
        );

        Ok(offset)
    }

    /// Release the block that starts at `offset`, merging it with free neighbours
    pub fn free(&mut self, offset: usize) -> Result<()> {
        let (mut index, block) = self
            .blocks_with_offsets()
            .find(|&(_, start, _)| start == offset)
            .map(|(index, _, block)| (index, *block))
            .ok_or(Error::InvalidFree {
                offset,
                reason: FreeFault::NoBlockAtOffset,
            })?;

        if block.is_free() {
            return Err(Error::InvalidFree {
                offset,
                reason: FreeFault::AlreadyFree,
            });
        }

        let mut extent = block.extent;
        self.allocated_bytes -= extent.bytes().unwrap_or(0);

        if index + 1 < self.blocks.len() && self.blocks[index + 1].is_free() {
            extent = extent.absorb(self.blocks[index + 1].extent);
            self.blocks.remove(index + 1);
        }
        if index > 0 && self.blocks[index - 1].is_free() {
            extent = self.blocks[index - 1].extent.absorb(extent);
            self.blocks.remove(index);
            index -= 1;
        }

        self.blocks[index] = Block::new(extent, BlockState::Free);
        debug!("freed block at offset {}, free run there is now {}", offset, extent);
        trace!("pool after free:\n{}", self.report());

        Ok(())
    }

    /// Snapshot of the block list and usage counters
    pub fn report(&self) -> PoolReport {
        let blocks = self
            .blocks_with_offsets()
            .map(|(_, offset, block)| BlockInfo {
                offset,
                size: block.extent,
                state: block.state,
            })
            .collect();

        PoolReport {
            blocks,
            high_water_mark: self.high_water_mark,
            allocated_bytes: self.allocated_bytes,
        }
    }

    /// Write one `size=<n>, FREE|ALLOCATED` line per block
    pub fn dump<W: io::Write>(&self, out: &mut W) -> Result<()> {
        write!(out, "{}", self.report())?;
        Ok(())
    }

    fn first_fit(&self, size: usize) -> Option<(usize, usize)> {
        self.blocks_with_offsets()
            .find(|(_, _, block)| block.is_free() && block.extent.fits(size))
            .map(|(index, offset, _)| (index, offset))
    }

    fn best_fit(&self, size: usize) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize, Option<usize>)> = None;

        for (index, offset, block) in self.blocks_with_offsets() {
            if !block.is_free() || !block.extent.fits(size) {
                continue;
            }
            let slack = block.extent.slack(size);
            let tighter = match best {
                None => true,
                Some((_, _, best_slack)) => match (slack, best_slack) {
                    (Some(a), Some(b)) => a < b,
                    (Some(_), None) => true,
                    (None, _) => false,
                },
            };
            if tighter {
                best = Some((index, offset, slack));
            }
        }

        best.map(|(index, offset, _)| (index, offset))
    }

    /// Blocks paired with their index and start offset
    fn blocks_with_offsets(&self) -> impl Iterator<Item = (usize, usize, &Block)> + '_ {
        self.blocks
            .iter()
            .enumerate()
            .scan(0usize, |next_offset, (index, block)| {
                let offset = *next_offset;
                if let Extent::Bytes(bytes) = block.extent {
                    *next_offset += bytes;
                }
                Some((index, offset, block))
            })
    }

    /// Round `size` up to a multiple of `alignment`; zero becomes one quantum
    fn align(size: usize, alignment: usize) -> Option<usize> {
        if size == 0 {
            return Some(alignment);
        }
        match size % alignment {
            0 => Some(size),
            remainder => size.checked_add(alignment - remainder),
        }
    }
}
