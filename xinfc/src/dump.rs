//! Read-only inspection of the tag's NDEF area

use data_encoding::HEXLOWER;
use log::{debug, info};
use xinfc_i2c::{BusError, I2cBus, TagDevice};
use xinfc_proto::{NDEF_CAPACITY, NdefBuffer, WscRecord};

use crate::config::ProvisionConfig;
use crate::provision::{self, ProvisionError};

const BYTES_PER_LINE: usize = 16;

#[derive(Debug)]
pub struct TagDump {
    pub contents: NdefBuffer,
    /// Present when the area holds a credential record
    pub record: Option<WscRecord>,
}

/// Open the bus and read the whole NDEF area; nothing is written
pub fn read_dump<B, F>(open: F, address: u16, config: &ProvisionConfig) -> Result<TagDump, ProvisionError>
where
    B: I2cBus,
    F: FnOnce() -> Result<B, BusError>,
{
    let bus = open().map_err(ProvisionError::Open)?;
    let mut tag = TagDevice::new(bus, address);

    let result = read_contents(&mut tag, config);
    tag.close();
    let contents = result?;

    let record = match WscRecord::decode(contents.as_slice()) {
        Ok(record) => Some(record),
        Err(e) => {
            debug!("no credential record on tag: {e}");
            None
        }
    };
    Ok(TagDump { contents, record })
}

fn read_contents<B: I2cBus>(tag: &mut TagDevice<B>, config: &ProvisionConfig) -> Result<NdefBuffer, ProvisionError> {
    provision::configure(tag, config).map_err(ProvisionError::Configure)?;

    info!("Reading NDEF data...");
    let mut contents = NdefBuffer::new();
    let n = tag
        .read_tag(contents.as_mut_array(), NDEF_CAPACITY)
        .map_err(ProvisionError::InitialRead)?;
    contents.set_len(n);
    Ok(contents)
}

/// `offset: hex` lines, 16 bytes each
pub fn hex_lines(data: &[u8]) -> Vec<String> {
    data.chunks(BYTES_PER_LINE)
        .enumerate()
        .map(|(i, line)| format!("{:04x}: {}", i * BYTES_PER_LINE, HEXLOWER.encode(line)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use xinfc_i2c::{NDEF_BASE_ADDR, SimulatedTag};
    use xinfc_proto::{Auth, Crypt};

    #[test]
    fn decodes_provisioned_tag() {
        let record = WscRecord::new(b"home", b"secret-pass", Crypt::Aes, Auth::Wpa2Personal);
        let encoded = record.encode().unwrap();
        let mut sim = SimulatedTag::with_contents(NDEF_BASE_ADDR, encoded.as_slice());

        let dump = read_dump(|| Ok(&mut sim), 0x57, &ProvisionConfig::without_delays()).unwrap();
        assert_eq!(dump.contents.len(), NDEF_CAPACITY);
        assert_eq!(dump.record, Some(record));
        assert!(sim.is_closed());
        // only the initial combined read went over the bus
        assert_eq!(sim.transfers().len(), 1);
    }

    #[test]
    fn blank_tag_has_no_record() {
        let mut sim = SimulatedTag::new();
        let dump = read_dump(|| Ok(&mut sim), 0x57, &ProvisionConfig::without_delays()).unwrap();
        assert!(dump.record.is_none());
        assert!(dump.contents.as_slice().iter().all(|b| *b == 0));
    }

    #[test]
    fn read_failure() {
        let mut sim = SimulatedTag::new();
        sim.fail_reads(1);
        let err = read_dump(|| Ok(&mut sim), 0x57, &ProvisionConfig::without_delays()).unwrap_err();
        assert_eq!(err.exit_code(), 22);
        assert!(sim.is_closed());
    }

    #[test]
    fn hex_line_layout() {
        let data: Vec<u8> = (0..20).collect();
        assert_eq!(
            hex_lines(&data),
            vec![
                "0000: 000102030405060708090a0b0c0d0e0f".to_string(),
                "0010: 10111213".to_string(),
            ]
        );
        assert!(hex_lines(&[]).is_empty());
    }
}
