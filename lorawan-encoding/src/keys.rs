// Copyright (c) 2017-2020 Ivaylo Petrov
//
// Licensed under the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//
// author: Ivaylo Petrov <ivajloip@gmail.com>

//! Key material and the pluggable crypto primitive traits.
use generic_array::{typenum::U16, GenericArray};

macro_rules! lorawan_key {
    (
        $(#[$outer:meta])*
        pub struct $type:ident(AES128);
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
        pub struct $type(pub AES128);

        impl From<[u8; 16]> for $type {
            fn from(key: [u8; 16]) -> Self {
                $type(AES128(key))
            }
        }

        impl $type {
            pub fn inner(&self) -> &AES128 {
                &self.0
            }
        }

        impl AsRef<[u8]> for $type {
            fn as_ref(&self) -> &[u8] {
                &self.0 .0
            }
        }
    };
}

lorawan_key!(
    /// The pre-provisioned root key shared with the join server.
    pub struct AppKey(AES128);
);
lorawan_key!(
    /// Network session key, derived at Join-Accept; secures the MIC and FPort-0 FRMPayload.
    pub struct NwkSKey(AES128);
);
lorawan_key!(
    /// Application session key, derived at Join-Accept; secures FPort != 0 FRMPayload.
    pub struct AppSKey(AES128);
);

macro_rules! lorawan_eui {
    (
        $(#[$outer:meta])*
        pub struct $type:ident;
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
        pub struct $type(pub [u8; 8]);

        impl From<[u8; 8]> for $type {
            fn from(v: [u8; 8]) -> Self {
                $type(v)
            }
        }

        impl AsRef<[u8]> for $type {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }
    };
}

lorawan_eui!(
    /// Globally unique device identifier, in the conventional MSB-first order (as printed by a
    /// provisioning tool). The frame codec reverses it into wire order when building a
    /// Join-Request.
    pub struct DevEui;
);
lorawan_eui!(
    /// Globally unique join-server identifier, in the conventional MSB-first order. The frame
    /// codec reverses it into wire order when building a Join-Request.
    pub struct AppEui;
);

/// A raw 128-bit AES key.
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct AES128(pub [u8; 16]);

impl From<[u8; 16]> for AES128 {
    fn from(v: [u8; 16]) -> Self {
        AES128(v)
    }
}

/// A 4-byte LoRaWAN Message Integrity Code.
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct MIC(pub [u8; 4]);

impl From<[u8; 4]> for MIC {
    fn from(v: [u8; 4]) -> Self {
        MIC(v)
    }
}

impl MIC {
    pub fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }
}

/// Direction a frame travels, used to select the A/B0 block's `Dir` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub(crate) fn byte(self) -> u8 {
        match self {
            Direction::Up => 0,
            Direction::Down => 1,
        }
    }
}

/// Implemented by a single-block AES-128 encrypt primitive.
pub trait Encrypter {
    fn encrypt_block(&self, block: &mut GenericArray<u8, U16>);
}

/// Implemented by a CMAC accumulator.
pub trait Mac {
    fn input(&mut self, data: &[u8]);
    fn result(self) -> GenericArray<u8, U16>;
}

/// Abstracts the crypto primitives so callers may substitute a hardware-backed implementation
/// (e.g. a secure element) for the default software one.
pub trait CryptoFactory {
    type E: Encrypter;
    type M: Mac;

    fn new_enc(&self, key: &AES128) -> Self::E;
    fn new_mac(&self, key: &AES128) -> Self::M;
}
