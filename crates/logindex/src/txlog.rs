//! Reader for ZooKeeper transaction log files.
//!
//! Layout: a file header (`"ZKLG"` magic, format version, dbid), then a
//! sequence of `[crc: i64][len: i32][txn bytes][0x42]` records where the txn
//! bytes begin with the fixed 32-byte header (client id, cxid, zxid, time,
//! type). Files are preallocated, so a zero length marks the logical end.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};
use thiserror::Error;

use crate::record::{LogRecord, OpKind};

const TXLOG_MAGIC: i32 = 0x5a4b_4c47; // "ZKLG"
const RECORD_TERMINATOR: u8 = 0x42;
const TXN_HEADER_LEN: usize = 32;

/// A transaction log that could not be decoded.
#[derive(Debug, Error)]
pub enum TxlogError {
    /// The file does not start with the transaction log magic.
    #[error("bad magic: not a transaction log")]
    BadMagic,

    /// A record was cut short or its terminator is missing.
    #[error("corrupt record at offset {offset}: {reason}")]
    Corrupt {
        /// Byte offset of the offending record.
        offset: u64,
        /// What was wrong.
        reason: &'static str,
    },
}

fn read_ustring(cursor: &mut Cursor<&[u8]>) -> Option<String> {
    let len = cursor.read_i32::<BigEndian>().ok()?;
    if len < 0 {
        return None;
    }
    let mut buf = vec![0u8; len as usize];
    cursor.read_exact(&mut buf).ok()?;
    Some(String::from_utf8_lossy(&buf).into_owned())
}

fn read_buffer_len(cursor: &mut Cursor<&[u8]>) -> u32 {
    match cursor.read_i32::<BigEndian>() {
        Ok(len) if len > 0 => {
            let len = len as u32;
            let position = cursor.position() + u64::from(len);
            cursor.set_position(position);
            len
        }
        _ => 0,
    }
}

fn decode_txn(txn: &[u8]) -> Option<LogRecord> {
    let mut cursor = Cursor::new(txn);
    let _client_id = cursor.read_i64::<BigEndian>().ok()?;
    let _cxid = cursor.read_i32::<BigEndian>().ok()?;
    let zxid = cursor.read_i64::<BigEndian>().ok()?;
    let time_ms = cursor.read_i64::<BigEndian>().ok()?;
    let txn_type = cursor.read_i32::<BigEndian>().ok()?;

    let op = OpKind::from_txn_type(txn_type);
    let (path, payload_bytes) = match op {
        OpKind::Create | OpKind::SetData => {
            let path = read_ustring(&mut cursor);
            let payload = read_buffer_len(&mut cursor);
            (path, payload)
        }
        OpKind::Delete | OpKind::SetAcl => (read_ustring(&mut cursor), 0),
        _ => (None, 0),
    };

    Some(LogRecord {
        time_ms,
        zxid,
        op,
        path,
        payload_bytes,
    })
}

/// Decodes every record in a transaction log image.
///
/// # Errors
///
/// [`TxlogError::BadMagic`] for files that are not transaction logs,
/// [`TxlogError::Corrupt`] for torn or truncated records. A zero-length
/// record is the preallocated tail and ends the scan cleanly.
pub fn decode_log(data: &[u8]) -> Result<Vec<LogRecord>, TxlogError> {
    let mut cursor = Cursor::new(data);

    let magic = cursor
        .read_i32::<BigEndian>()
        .map_err(|_| TxlogError::BadMagic)?;
    if magic != TXLOG_MAGIC {
        return Err(TxlogError::BadMagic);
    }
    let _version = cursor.read_i32::<BigEndian>().map_err(|_| TxlogError::BadMagic)?;
    let _dbid = cursor.read_i64::<BigEndian>().map_err(|_| TxlogError::BadMagic)?;

    let mut records = Vec::new();
    loop {
        let offset = cursor.position();
        let remaining = data.len() as u64 - offset;
        if remaining < 13 {
            break;
        }

        let _crc = cursor.read_i64::<BigEndian>().map_err(|_| TxlogError::Corrupt {
            offset,
            reason: "short checksum",
        })?;
        let len = cursor.read_i32::<BigEndian>().map_err(|_| TxlogError::Corrupt {
            offset,
            reason: "short length",
        })?;
        if len == 0 {
            break;
        }
        if len < TXN_HEADER_LEN as i32 {
            return Err(TxlogError::Corrupt {
                offset,
                reason: "record shorter than txn header",
            });
        }

        let len = len as usize;
        let start = cursor.position() as usize;
        let Some(txn) = data.get(start..start + len) else {
            return Err(TxlogError::Corrupt {
                offset,
                reason: "record extends past end of file",
            });
        };
        cursor.set_position((start + len) as u64);

        let terminator = cursor.read_u8().map_err(|_| TxlogError::Corrupt {
            offset,
            reason: "missing terminator",
        })?;
        if terminator != RECORD_TERMINATOR {
            return Err(TxlogError::Corrupt {
                offset,
                reason: "bad terminator",
            });
        }

        let Some(record) = decode_txn(txn) else {
            return Err(TxlogError::Corrupt {
                offset,
                reason: "undecodable txn header",
            });
        };
        records.push(record);
    }

    Ok(records)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Write;

    use byteorder::{BigEndian, WriteBytesExt};

    use crate::record::LogRecord;

    fn op_code(record: &LogRecord) -> i32 {
        use crate::record::OpKind;
        match record.op {
            OpKind::Create => 1,
            OpKind::Delete => 2,
            OpKind::SetData => 5,
            OpKind::SetAcl => 7,
            OpKind::CreateSession => -10,
            OpKind::CloseSession => -11,
            OpKind::Multi => 14,
            OpKind::Error => -1,
            OpKind::Other => 99,
        }
    }

    /// Encodes records into the on-disk transaction log format.
    pub fn encode_log(records: &[LogRecord]) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_i32::<BigEndian>(super::TXLOG_MAGIC).unwrap();
        out.write_i32::<BigEndian>(2).unwrap(); // format version
        out.write_i64::<BigEndian>(1).unwrap(); // dbid

        for record in records {
            let mut txn = Vec::new();
            txn.write_i64::<BigEndian>(7).unwrap(); // client id
            txn.write_i32::<BigEndian>(0).unwrap(); // cxid
            txn.write_i64::<BigEndian>(record.zxid).unwrap();
            txn.write_i64::<BigEndian>(record.time_ms).unwrap();
            txn.write_i32::<BigEndian>(op_code(record)).unwrap();
            if let Some(path) = &record.path {
                txn.write_i32::<BigEndian>(path.len() as i32).unwrap();
                txn.write_all(path.as_bytes()).unwrap();
                if record.payload_bytes > 0 {
                    txn.write_i32::<BigEndian>(record.payload_bytes as i32).unwrap();
                    txn.write_all(&vec![0u8; record.payload_bytes as usize])
                        .unwrap();
                }
            }

            out.write_i64::<BigEndian>(0).unwrap(); // crc, unchecked on read
            out.write_i32::<BigEndian>(txn.len() as i32).unwrap();
            out.extend_from_slice(&txn);
            out.push(super::RECORD_TERMINATOR);
        }

        // preallocated tail
        out.extend_from_slice(&[0u8; 64]);
        out
    }
}
