//! A default, pure software implementation of LoRaWAN's cryptographic primitives.
use super::keys::*;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;

pub type Cmac = cmac::Cmac<Aes128>;

/// The software AES-128 / AES-CMAC implementation used unless a caller supplies their own
/// [`CryptoFactory`].
#[derive(Default, Debug, PartialEq, Eq)]
pub struct DefaultFactory;

impl CryptoFactory for DefaultFactory {
    type E = Aes128;
    type M = Cmac;

    fn new_enc(&self, key: &AES128) -> Self::E {
        Aes128::new(GenericArray::from_slice(&key.0[..]))
    }

    fn new_mac(&self, key: &AES128) -> Self::M {
        let key = GenericArray::from_slice(&key.0[..]);
        cmac::Mac::new(key)
    }
}

impl Encrypter for Aes128 {
    fn encrypt_block(&self, block: &mut GenericArray<u8, generic_array::typenum::U16>) {
        BlockEncrypt::encrypt_block(self, block);
    }
}

impl Mac for Cmac {
    fn input(&mut self, data: &[u8]) {
        cmac::Mac::update(self, data);
    }

    fn result(self) -> GenericArray<u8, generic_array::typenum::U16> {
        cmac::Mac::finalize(self).into_bytes()
    }
}
