// Copyright (c) 2017,2018,2020 Ivaylo Petrov
//
// Licensed under the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//
// author: Ivaylo Petrov <ivajloip@gmail.com>

//! Byte-exact serialization and parsing of LoRaWAN 1.0.x frames, plus the cryptographic
//! primitives (AES-CMAC MIC, AES-CTR payload cipher, session key derivation) needed to build
//! and validate them. This crate has no notion of protocol *state*: every public function is a
//! pure transformation of bytes in, bytes (or a parsed view) out.
#![no_std]
#![allow(clippy::upper_case_acronyms)]

pub mod crypto;
pub mod frame;
pub mod keys;
pub mod maccommands;
pub mod types;

#[cfg(feature = "default-crypto")]
pub mod default_crypto;
