#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! Every sample byte holds one bit per probed signal: red, green, blue,
//! insert and the composite horizontal/vertical sync (HVS). The firmware
//! reports which bit carries which signal, and whether the chip is in 40 or
//! 80 column mode, in a 6-byte status record.
//!
//! ### Rows and frames
//!
//! A falling edge of the HVS bit starts a row. A row whose middle sample has
//! HVS set belongs to the vertical sync interval, and the first regular row
//! after that interval closes the frame collected so far.
//!
//! ### 40 column mode
//!
//! Pixels change every 1.5 sample clocks, so every other pixel is sampled
//! twice. The decoder tries the three possible alignments and keeps the one
//! whose duplicated samples agree best.
//!
//! ## Quick Start
//!
//! 1. Open a [`device::CaptureEngine`] on a [`device::UsbBackend`]
//! 2. Feed its [`device::DeviceEvent`]s to a [`process::pipeline::CapturePipeline`]
//! 3. Render the resulting [`process::decode::DecodedFrame`]s with a palette
//!
//! Offline sample dumps can skip the device entirely and go straight to
//! [`process::sync::Synchronizer`] and [`process::decode::FrameDecoder`].

/// USB transfer engine and device backends.
///
/// - **Engine** ([`device::engine`]): transfer pool, worker thread, register access
/// - **Backends** ([`device::backend`]): the seam to a USB stack
/// - **Hardware** ([`device::hardware`]): `nusb` backend
/// - **Mock** ([`device::mock`]): in-memory device
pub mod device;

/// Sample stream processing.
///
/// 1. **Synchronization** ([`process::sync`]): rows and frames from samples
/// 2. **Decoding** ([`process::decode`]): phase correction, cropping, palettes
/// 3. **Pipeline** ([`process::pipeline`]): glue between the engine and both
pub mod process;

/// Data structures shared across the crate.
///
/// - **Channels** ([`structs::channels`]): bit assignment and capture mode
/// - **Status** ([`structs::status`]): firmware status records and chip type
/// - **Registers** ([`structs::register`]): video chip register addresses
/// - **Frames** ([`structs::frame`]): raw indexed frames
/// - **Palettes** ([`structs::palette`]): colour tables
pub mod structs;

/// Supporting infrastructure.
///
/// - **Error Handling** ([`utils::errors`]): Error types
/// - **Buffer Management** ([`utils::buffer_pool`]): Sample buffer reuse
pub mod utils;
