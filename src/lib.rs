//! # freeheap - Free-List Sub-Allocation over a Single Arena
//!
//! This crate provides a **dynamic allocator** that carves variable-sized
//! allocations out of one fixed memory arena, tracking the unused parts with
//! a **free list** whose metadata lives in the same upfront block.
//!
//! ## Overview
//!
//! ```text
//!   Free List Concept:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                              ARENA                                   │
//!   │                                                                      │
//!   │   ┌─────┬──────────┬─────┬─────┬────────┬──────────────────────────┐ │
//!   │   │ A1  │   free   │ A2  │ A3  │  free  │          free            │ │
//!   │   └─────┴──────────┴─────┴─────┴────────┴──────────────────────────┘ │
//!   │          ▲                       ▲                                   │
//!   │          │                       │                                   │
//!   │       node 0 ─────────────────► node 1   (sorted by offset)          │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Allocation takes the first free range large enough (first fit).
//!   Freeing merges the range with touching neighbours (coalescing).
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   freeheap
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── config     - Pool sizing and memory system configuration (TOML)
//!   ├── dynamic    - DynamicAllocator and ArenaPtr
//!   ├── error      - AllocError
//!   ├── freelist   - FreeList, the free-range tracker
//!   ├── linear     - LinearAllocator (bump allocation, free-all only)
//!   ├── platform   - Platform blocks and bulk memory primitives
//!   └── system     - MemorySystem, tagged allocation accounting
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use freeheap::{Block, DynamicAllocator, FreeListConfig};
//!
//! let config = FreeListConfig::default();
//!
//! // First pass: how much memory does the allocator need?
//! let required = DynamicAllocator::memory_requirement(1024 * 1024, &config).unwrap();
//!
//! // Second pass: hand it the memory.
//! let block = Block::allocate(required).unwrap();
//! let mut allocator = DynamicAllocator::create(1024 * 1024, block, &config).unwrap();
//!
//! let ptr = allocator.allocate(64).unwrap();
//! allocator.bytes_mut(ptr, 8).unwrap().copy_from_slice(&42u64.to_ne_bytes());
//! allocator.free(ptr, 64).unwrap();
//! ```
//!
//! ## How It Works
//!
//! Every byte comes from a single [`Block`] requested from the platform:
//!
//! ```text
//!   ┌────────────┬─────────────────────────────────┬───────────────────────┐
//!   │  Allocator │          Free List              │        Arena          │
//!   │  header    │  ┌────────┬───────────────────┐ │                       │
//!   │            │  │ header │ node pool (slots) │ │   total_size bytes    │
//!   │            │  └────────┴───────────────────┘ │                       │
//!   └────────────┴─────────────────────────────────┴───────────────────────┘
//! ```
//!
//! Each free node records `{offset, size, next}`. An allocation either
//! shrinks a node in place or, on an exact fit, removes it and returns its
//! slot to the pool. A free inserts a node in offset order and merges it
//! with its neighbours. The pool never grows: when every slot is live and a
//! free cannot merge, the free fails instead of touching the chain.
//!
//! ## Features
//!
//! - **No hidden allocation**: all metadata lives in the caller's block
//! - **First-fit search** with in-place splitting
//! - **Coalescing** of touching free ranges on every free
//! - **Configurable node pool** capacity
//! - **Tagged accounting** through [`MemorySystem`]
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Caller tracks sizes**: `free` needs the size that was allocated
//! - **No best fit**: `allocate_block_best` falls back to first fit
//! - **Grow only**: a free list can be resized up, never down
//!
//! ## Safety
//!
//! Unsafe code is confined to [`platform`], which wraps `libc` allocation and
//! bulk memory calls. Everything above it works on bounds-checked slices.

pub mod align;
pub mod config;
mod dynamic;
mod error;
pub mod freelist;
mod linear;
pub mod platform;
mod system;

pub use config::{ConfigError, FreeListConfig, MemorySystemConfig};
pub use dynamic::{ArenaPtr, DynamicAllocator};
pub use error::{AllocError, Result};
pub use freelist::{FREELIST_ALIGN, FreeList, FreeListView};
pub use linear::LinearAllocator;
pub use platform::Block;
pub use system::{MemoryStats, MemorySystem, MemoryTag};
