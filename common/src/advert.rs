//! Advertisement decoding for the dimmer family.
//!
//! Dimmers broadcast their state in a vendor-specific (manufacturer data)
//! record. Offsets below are relative to the record payload, after the
//! 16-bit company identifier has been stripped.

use crate::{address::DeviceAddress, config::DimmerProfile};

const REVISION_OFFSET: usize = 5;
const STATE_OFFSET: usize = 6;
const LEVEL_OFFSET: usize = 7;
const STATE_MASK: u8 = 0x0F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Public,
    Random,
}

/// One advertisement event as delivered by the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub address: DeviceAddress,
    pub address_type: AddressType,
    pub local_name: Option<String>,
    /// Manufacturer records as `(company id, payload)`, in received order.
    pub manufacturer_data: Vec<(u16, Vec<u8>)>,
}

/// Decoded dimmer state carried by one advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    /// Settings revision counter. Reserved, not used for change detection.
    pub revision: u8,
    pub is_on: bool,
    /// Normalized to 0..=100.
    pub brightness: u8,
}

/// Why an advertisement did not produce a [`Reading`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    NotPublic,
    NameMismatch,
    NoPayload,
    ForeignTag(u16),
    ShortPayload(usize),
}

pub fn decode(advertisement: &Advertisement, profile: &DimmerProfile) -> Result<Reading, Skip> {
    if advertisement.address_type != AddressType::Public {
        return Err(Skip::NotPublic);
    }

    if let Some(prefix) = profile.name_prefix.as_deref() {
        let name = advertisement.local_name.as_deref().unwrap_or_default();
        if !name.starts_with(prefix) {
            return Err(Skip::NameMismatch);
        }
    }

    // The last record wins when a device sends several.
    let (tag, payload) = advertisement
        .manufacturer_data
        .last()
        .ok_or(Skip::NoPayload)?;
    if *tag != profile.manufacturer_id {
        return Err(Skip::ForeignTag(*tag));
    }

    decode_payload(payload)
}

pub fn decode_payload(payload: &[u8]) -> Result<Reading, Skip> {
    let (Some(&revision), Some(&state), Some(&level)) = (
        payload.get(REVISION_OFFSET),
        payload.get(STATE_OFFSET),
        payload.get(LEVEL_OFFSET),
    ) else {
        return Err(Skip::ShortPayload(payload.len()));
    };

    let is_on = state & STATE_MASK != 0;
    Ok(Reading {
        revision,
        is_on,
        brightness: normalize_brightness(level, is_on),
    })
}

/// Scales a raw 0..=255 level to 0..=100, rounding to nearest.
///
/// A light that is on never reports 0.
pub fn normalize_brightness(raw: u8, is_on: bool) -> u8 {
    let scaled = (u16::from(raw) * 100 + 127) / 255;
    let scaled = u8::try_from(scaled).unwrap_or(100);
    if is_on && scaled == 0 {
        1
    } else {
        scaled
    }
}

/// Builds the manufacturer payload a dimmer would advertise for a state.
///
/// Inverse of [`decode_payload`] up to rounding of the level.
pub fn encode_payload(revision: u8, is_on: bool, brightness: u8) -> Vec<u8> {
    let level = (u16::from(brightness.min(100)) * 255 + 50) / 100;
    let mut payload = vec![0u8; LEVEL_OFFSET + 1];
    payload[REVISION_OFFSET] = revision;
    payload[STATE_OFFSET] = u8::from(is_on);
    payload[LEVEL_OFFSET] = u8::try_from(level).unwrap_or(u8::MAX);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn hall() -> DeviceAddress {
        DeviceAddress::new([0x00, 0x0D, 0x6F, 0xC6, 0xAA, 0x79])
    }

    fn advert(payload: Vec<u8>) -> Advertisement {
        let profile = DimmerProfile::default();
        Advertisement {
            address: hall(),
            address_type: AddressType::Public,
            local_name: Some("MICRO_DIMMER_12".to_string()),
            manufacturer_data: vec![(profile.manufacturer_id, payload)],
        }
    }

    #[test]
    fn brightness_normalization_edges() {
        assert_eq!(normalize_brightness(255, true), 100);
        assert_eq!(normalize_brightness(255, false), 100);
        assert_eq!(normalize_brightness(0, true), 1);
        assert_eq!(normalize_brightness(0, false), 0);
        assert_eq!(normalize_brightness(128, true), 50);
        assert_eq!(normalize_brightness(1, true), 1);
    }

    #[test]
    fn decodes_hall_light_advertisement() {
        let payload = vec![0x10, 0x20, 0x30, 0x40, 0x50, 7, 0x01, 128];
        let reading = decode(&advert(payload), &DimmerProfile::default()).unwrap();
        assert_eq!(
            reading,
            Reading {
                revision: 7,
                is_on: true,
                brightness: 50,
            }
        );
    }

    #[test]
    fn on_flag_uses_low_bits_only() {
        let off = decode_payload(&[0, 0, 0, 0, 0, 0, 0xF0, 200]).unwrap();
        assert!(!off.is_on);
        let on = decode_payload(&[0, 0, 0, 0, 0, 0, 0x04, 200]).unwrap();
        assert!(on.is_on);
    }

    #[test]
    fn filters_non_public_addresses() {
        let mut adv = advert(encode_payload(0, true, 40));
        adv.address_type = AddressType::Random;
        assert_eq!(
            decode(&adv, &DimmerProfile::default()),
            Err(Skip::NotPublic)
        );
    }

    #[test]
    fn filters_missing_and_foreign_payloads() {
        let profile = DimmerProfile::default();

        let mut adv = advert(Vec::new());
        adv.manufacturer_data.clear();
        assert_eq!(decode(&adv, &profile), Err(Skip::NoPayload));

        let mut adv = advert(encode_payload(0, true, 40));
        adv.manufacturer_data[0].0 = profile.manufacturer_id.wrapping_add(1);
        assert!(matches!(decode(&adv, &profile), Err(Skip::ForeignTag(_))));

        let adv = advert(vec![1, 2, 3]);
        assert_eq!(decode(&adv, &profile), Err(Skip::ShortPayload(3)));
    }

    #[test]
    fn name_prefix_is_optional() {
        let mut adv = advert(encode_payload(0, false, 0));
        adv.local_name = Some("SOMETHING_ELSE".to_string());

        let mut profile = DimmerProfile::default();
        assert_eq!(decode(&adv, &profile), Err(Skip::NameMismatch));

        profile.name_prefix = None;
        assert!(decode(&adv, &profile).is_ok());
    }

    #[test]
    fn encoded_payload_decodes_to_same_percent() {
        for brightness in [0u8, 1, 25, 50, 99, 100] {
            let reading = decode_payload(&encode_payload(3, true, brightness)).unwrap();
            assert_eq!(reading.brightness, brightness.max(1));
        }
    }
}
