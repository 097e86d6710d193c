//! Test helper modules for flaas-master integration tests
//!
//! - FakeLive: in-memory Live session behind the `LiveControl` trait
//! - Scripted collaborators: meter, renderer and operator with canned behavior
//! - Audio generators: deterministic WAV files via hound

#![allow(dead_code)]

pub mod audio_generator;
pub mod fake_live;
pub mod scripted;

pub use fake_live::{FakeDevice, FakeLive};
pub use scripted::{FileRenderer, PlantMeter, ScriptedMeter, ScriptedOperator, TimeoutRenderer};
