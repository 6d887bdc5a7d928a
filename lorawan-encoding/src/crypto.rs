//! Pure, stateless LoRaWAN cryptographic operations (spec component "Crypto").
//!
//! Every function here takes all of its inputs as arguments and fails only if an underlying
//! primitive does; none of them hold session state. `MacCore` is the only caller that threads
//! frame counters and keys through.
use generic_array::GenericArray;

use crate::keys::{AppKey, CryptoFactory, Direction, Encrypter, Mac as MacTrait, AES128, MIC};
use crate::types::DevAddr;

/// The only failure mode exposed by this module: an underlying AES/CMAC primitive misbehaved.
/// The software implementation in [`crate::default_crypto`] never returns this; it exists for
/// hardware-backed `CryptoFactory` implementations (e.g. a secure element) that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoError;

/// Builds the 16-byte `A_i` (CTR) or `B_0` (CMAC) block shared by `payload_encrypt` and
/// `compute_mic`. `first` distinguishes the two (`0x01` vs `0x49`); `tail` is either the block
/// counter (CTR) or the message length (CMAC).
fn auth_block(first: u8, dev_addr: DevAddr, dir: Direction, fcnt32: u32, tail: u8) -> [u8; 16] {
    let mut b = [0u8; 16];
    b[0] = first;
    // b[1..5] reserved, always zero.
    b[5] = dir.byte();
    b[6..10].copy_from_slice(&dev_addr.to_le_bytes());
    b[10..14].copy_from_slice(&fcnt32.to_le_bytes());
    // b[14] reserved, always zero.
    b[15] = tail;
    b
}

/// AES-128-CTR over the LoRaWAN `A_i` block layout. Encryption and decryption are the same XOR
/// operation, so this function serves both directions.
pub fn payload_encrypt<C: CryptoFactory>(
    factory: &C,
    key: &AES128,
    dev_addr: DevAddr,
    dir: Direction,
    fcnt32: u32,
    data: &mut [u8],
) -> Result<(), CryptoError> {
    let enc = factory.new_enc(key);
    let mut counter: u8 = 1;
    for chunk in data.chunks_mut(16) {
        let mut block = auth_block(0x01, dev_addr, dir, fcnt32, counter);
        let mut ga = GenericArray::clone_from_slice(&block);
        enc.encrypt_block(&mut ga);
        block.copy_from_slice(&ga);
        for (b, k) in chunk.iter_mut().zip(block.iter()) {
            *b ^= k;
        }
        counter = counter.wrapping_add(1);
    }
    Ok(())
}

/// Computes the 4-byte MIC over `msg` (which must be `MHDR..FRMPayload`, i.e. everything but the
/// trailing MIC itself) under the given key, direction and 32-bit frame counter.
pub fn compute_mic<C: CryptoFactory>(
    factory: &C,
    key: &AES128,
    dev_addr: DevAddr,
    dir: Direction,
    fcnt32: u32,
    msg: &[u8],
) -> Result<MIC, CryptoError> {
    let b0 = auth_block(0x49, dev_addr, dir, fcnt32, msg.len() as u8);
    let mut mac = factory.new_mac(key);
    mac.input(&b0);
    mac.input(msg);
    let full = MacTrait::result(mac);
    let mut mic = [0u8; 4];
    mic.copy_from_slice(&full[0..4]);
    Ok(MIC(mic))
}

/// CMAC over the raw Join-Request/Join-Accept message, with no `B0` prefix.
pub fn join_compute_mic<C: CryptoFactory>(
    factory: &C,
    app_key: &AppKey,
    msg: &[u8],
) -> Result<MIC, CryptoError> {
    let mut mac = factory.new_mac(&app_key.0);
    mac.input(msg);
    let full = MacTrait::result(mac);
    let mut mic = [0u8; 4];
    mic.copy_from_slice(&full[0..4]);
    Ok(MIC(mic))
}

/// "Decrypts" a Join-Accept payload. LoRaWAN defines Join-Accept encryption as an AES *decrypt*
/// operation performed by the network, so the device reverses it with plain AES *encrypt*,
/// applied independently to each 16-byte block (there is no CBC chaining between blocks). `data`
/// is everything after the MHDR byte: 16 bytes for a plain Join-Accept, or 32 when a CFList is
/// present.
pub fn join_decrypt<C: CryptoFactory>(
    factory: &C,
    app_key: &AppKey,
    data: &mut [u8],
) -> Result<(), CryptoError> {
    if data.len() != 16 && data.len() != 32 {
        return Err(CryptoError);
    }
    let enc = factory.new_enc(&app_key.0);
    for block in data.chunks_mut(16) {
        let mut ga = GenericArray::clone_from_slice(block);
        enc.encrypt_block(&mut ga);
        block.copy_from_slice(&ga);
    }
    Ok(())
}

/// Derives `NwkSKey`/`AppSKey` from a successful Join-Accept, per LoRaWAN 1.0.x section 6.2.5:
/// each key is `AES128_Encrypt(AppKey, prefix | AppNonce | NetID | DevNonce | pad16)`, with
/// prefix `0x01` for NwkSKey and `0x02` for AppSKey.
pub fn derive_session_keys<C: CryptoFactory>(
    factory: &C,
    app_key: &AppKey,
    app_nonce: [u8; 3],
    net_id: [u8; 3],
    dev_nonce: u16,
) -> Result<(crate::keys::NwkSKey, crate::keys::AppSKey), CryptoError> {
    let derive = |prefix: u8| -> [u8; 16] {
        let mut block = [0u8; 16];
        block[0] = prefix;
        block[1..4].copy_from_slice(&app_nonce);
        block[4..7].copy_from_slice(&net_id);
        block[7..9].copy_from_slice(&dev_nonce.to_le_bytes());
        // block[9..16] stays zero-padded.
        block
    };
    let enc = factory.new_enc(&app_key.0);
    let mut nwk = derive(0x01);
    let mut app = derive(0x02);
    let mut ga = GenericArray::clone_from_slice(&nwk);
    enc.encrypt_block(&mut ga);
    nwk.copy_from_slice(&ga);
    let mut ga = GenericArray::clone_from_slice(&app);
    enc.encrypt_block(&mut ga);
    app.copy_from_slice(&ga);
    Ok((crate::keys::NwkSKey(AES128(nwk)), crate::keys::AppSKey(AES128(app))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::default_crypto::DefaultFactory;

    #[test]
    fn payload_encrypt_is_its_own_inverse() {
        let key = AES128([0x2b; 16]);
        let mut data = *b"hello world! this is lorawan";
        let orig = data;
        payload_encrypt(
            &DefaultFactory,
            &key,
            DevAddr(0x07080910),
            Direction::Up,
            1,
            &mut data,
        )
        .unwrap();
        assert_ne!(&data[..], &orig[..]);
        payload_encrypt(
            &DefaultFactory,
            &key,
            DevAddr(0x07080910),
            Direction::Up,
            1,
            &mut data,
        )
        .unwrap();
        assert_eq!(&data[..], &orig[..]);
    }

    #[test]
    fn join_decrypt_then_mic_round_trips() {
        // A 16-byte Join-Accept body (AppNonce|NetID|DevAddr|DLSettings|RxDelay|MIC placeholder)
        // encrypted with the "network" side (AES decrypt) must come back out under our encrypt.
        let app_key = AppKey::from([0u8; 16]);
        let plaintext: [u8; 16] = [
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x10, 0x00, 0x01, 0xaa, 0xbb,
            0xcc, 0xdd,
        ];
        // Simulate the network's "encrypt" (actually AES decrypt) by using AES decrypt directly.
        use aes::cipher::{generic_array::GenericArray as GA, BlockDecrypt, KeyInit};
        let cipher = aes::Aes128::new(GA::from_slice(&app_key.0 .0));
        let mut wire = plaintext;
        let mut block = GA::clone_from_slice(&wire);
        BlockDecrypt::decrypt_block(&cipher, &mut block);
        wire.copy_from_slice(&block);

        join_decrypt(&DefaultFactory, &app_key, &mut wire).unwrap();
        assert_eq!(wire, plaintext);
    }
}
