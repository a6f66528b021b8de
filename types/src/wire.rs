//! Messages exchanged during a pairwise sync.
//!
//! Every payload is a canonical `commonware-codec` encoding framed by the
//! transport (ASCII decimal length, newline, bytes). The exchange is
//! symmetric: each side announces its tips, then sends the units the other
//! side is missing.

use crate::{Transaction, Unit};
use bytes::{Buf, BufMut};
use commonware_codec::{
    varint::UInt, EncodeSize, Error, RangeCfg, Read, ReadExt, ReadRangeExt, Write,
};
use commonware_cryptography::sha256::Digest;

/// The maximum committee size a status message may describe.
pub const MAX_COMMITTEE: usize = 1_024;

/// The maximum number of sibling digests a tip may list (forkers only).
pub const MAX_TIP_HASHES: usize = 64;

/// The maximum number of units a single sync batch may carry.
pub const MAX_BATCH_UNITS: usize = 4_096;

/// The highest admitted unit(s) of one creator: the largest height observed
/// and every digest at that height (more than one only if the creator forked).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tip {
    pub height: Option<u64>,
    pub hashes: Vec<Digest>,
}

impl Tip {
    pub fn empty() -> Self {
        Self {
            height: None,
            hashes: Vec::new(),
        }
    }
}

impl Write for Tip {
    fn write(&self, writer: &mut impl BufMut) {
        match self.height {
            Some(height) => {
                1u8.write(writer);
                UInt(height).write(writer);
            }
            None => 0u8.write(writer),
        }
        self.hashes.write(writer);
    }
}

impl Read for Tip {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let height = match u8::read(reader)? {
            0 => None,
            1 => Some(UInt::read(reader)?.into()),
            tag => return Err(Error::InvalidEnum(tag)),
        };
        let hashes = Vec::<Digest>::read_range(reader, 0..=MAX_TIP_HASHES)?;
        Ok(Self { height, hashes })
    }
}

impl EncodeSize for Tip {
    fn encode_size(&self) -> usize {
        1 + self
            .height
            .map(|height| UInt(height).encode_size())
            .unwrap_or(0)
            + self.hashes.encode_size()
    }
}

/// The opening (and answering) message of a sync: who we are and, per
/// creator, how far we have gotten.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    pub process: u32,
    pub tips: Vec<Tip>,
}

impl Write for Status {
    fn write(&self, writer: &mut impl BufMut) {
        self.process.write(writer);
        self.tips.write(writer);
    }
}

impl Read for Status {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let process = u32::read(reader)?;
        let tips =
            Vec::<Tip>::read_cfg(reader, &(RangeCfg::from(1..=MAX_COMMITTEE), ()))?;
        Ok(Self { process, tips })
    }
}

impl EncodeSize for Status {
    fn encode_size(&self) -> usize {
        self.process.encode_size() + self.tips.encode_size()
    }
}

/// The units one side is missing, in an order that admits cleanly (parents
/// before children as far as the sender knows them).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitBatch {
    pub units: Vec<Unit>,
}

impl Write for UnitBatch {
    fn write(&self, writer: &mut impl BufMut) {
        self.units.write(writer);
    }
}

impl Read for UnitBatch {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let units =
            Vec::<Unit>::read_cfg(reader, &(RangeCfg::from(0..=MAX_BATCH_UNITS), ()))?;
        Ok(Self { units })
    }
}

impl EncodeSize for UnitBatch {
    fn encode_size(&self) -> usize {
        self.units.encode_size()
    }
}

/// A batch of signed transfers delivered on the ingress port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionBatch {
    pub transactions: Vec<Transaction>,
}

impl Write for TransactionBatch {
    fn write(&self, writer: &mut impl BufMut) {
        self.transactions.write(writer);
    }
}

impl Read for TransactionBatch {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let transactions =
            Vec::<Transaction>::read_cfg(reader, &(RangeCfg::from(0..=MAX_BATCH_UNITS), ()))?;
        Ok(Self { transactions })
    }
}

impl EncodeSize for TransactionBatch {
    fn encode_size(&self) -> usize {
        self.transactions.encode_size()
    }
}
