use std::fmt;
use std::str::FromStr;

use crate::error::BitError;

/// A named bit range within a control word.
///
/// The `msb`/`lsb` order is kept for display, but range membership always
/// uses the lower and upper bound, so `BitMask::new(1, 3)` and
/// `BitMask::new(3, 1)` cover the same bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BitMask {
    pub(crate) msb: usize,
    pub(crate) lsb: usize,
}

impl BitMask {
    pub(crate) fn new(msb: usize, lsb: usize) -> Self {
        BitMask { msb, lsb }
    }

    pub(crate) fn single(bit: usize) -> Self {
        BitMask { msb: bit, lsb: bit }
    }

    pub(crate) fn lower_bound(&self) -> usize {
        self.msb.min(self.lsb)
    }

    pub(crate) fn upper_bound(&self) -> usize {
        self.msb.max(self.lsb)
    }

    /// Number of bits covered by the mask.
    pub(crate) fn length(&self) -> usize {
        self.upper_bound() - self.lower_bound() + 1
    }

    /// Largest value representable in the mask's bits.
    pub(crate) fn max_value(&self) -> u64 {
        match self.length() {
            len if len >= 64 => u64::MAX,
            len => (1u64 << len) - 1,
        }
    }

    pub(crate) fn overlaps_with(&self, other: &BitMask) -> bool {
        self.lower_bound() <= other.upper_bound() && other.lower_bound() <= self.upper_bound()
    }

    /// Converts the mask into a plain integer bitmask.
    pub(crate) fn to_u64_mask(&self) -> Result<u64, BitError> {
        if self.upper_bound() >= u64::BITS as usize {
            return Err(BitError::MaskTooWide {
                mask: *self,
                bits: u64::BITS,
            });
        }
        Ok(self.max_value() << self.lower_bound())
    }

    /// The same mask moved `offset` bits towards the MSB.
    pub(crate) fn shifted(&self, offset: usize) -> Self {
        BitMask::new(self.msb + offset, self.lsb + offset)
    }
}

impl fmt::Display for BitMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.msb == self.lsb {
            write!(f, "{}", self.msb)
        } else {
            write!(f, "{}:{}", self.msb, self.lsb)
        }
    }
}

/// A fixed-width sequence of bits, index 0 being the least significant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BitField {
    bits: Vec<bool>,
}

impl BitField {
    pub(crate) fn new(width: usize) -> Self {
        BitField {
            bits: vec![false; width],
        }
    }

    #[allow(dead_code)]
    pub(crate) fn width(&self) -> usize {
        self.bits.len()
    }

    fn check_index(&self, index: usize) -> Result<(), BitError> {
        if index >= self.bits.len() {
            return Err(BitError::IndexOutOfRange {
                index,
                width: self.bits.len(),
            });
        }
        Ok(())
    }

    #[allow(dead_code)]
    pub(crate) fn get(&self, index: usize) -> Result<bool, BitError> {
        self.check_index(index)?;
        Ok(self.bits[index])
    }

    #[allow(dead_code)]
    pub(crate) fn set(&mut self, index: usize, value: bool) -> Result<(), BitError> {
        self.check_index(index)?;
        self.bits[index] = value;
        Ok(())
    }

    /// Reads the inclusive range between `a` and `b` as an unsigned integer.
    ///
    /// The smaller index holds the least significant bit. Bits beyond the
    /// 64th place of the range are not representable and read as absent.
    pub(crate) fn get_range(&self, a: usize, b: usize) -> Result<u64, BitError> {
        self.check_index(a)?;
        self.check_index(b)?;
        let (lo, hi) = (a.min(b), a.max(b));
        let value = self.bits[lo..=hi]
            .iter()
            .take(u64::BITS as usize)
            .enumerate()
            .filter(|(_, bit)| **bit)
            .fold(0u64, |acc, (place, _)| acc | (1u64 << place));
        Ok(value)
    }

    /// Writes `value` into the inclusive range between `a` and `b`.
    ///
    /// High bits of `value` that do not fit the range are dropped.
    pub(crate) fn set_range(&mut self, a: usize, b: usize, value: u64) -> Result<(), BitError> {
        self.check_index(a)?;
        self.check_index(b)?;
        let (lo, hi) = (a.min(b), a.max(b));
        for (place, bit) in self.bits[lo..=hi].iter_mut().enumerate() {
            *bit = place < u64::BITS as usize && (value >> place) & 1 == 1;
        }
        Ok(())
    }

    #[allow(dead_code)]
    pub(crate) fn get_masked(&self, mask: BitMask, offset: usize) -> Result<u64, BitError> {
        let mask = mask.shifted(offset);
        self.get_range(mask.msb, mask.lsb)
    }

    pub(crate) fn set_masked(
        &mut self,
        mask: BitMask,
        offset: usize,
        value: u64,
    ) -> Result<(), BitError> {
        let mask = mask.shifted(offset);
        self.set_range(mask.msb, mask.lsb, value)
    }
}

impl fmt::Display for BitField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in self.bits.iter().rev() {
            f.write_str(if *bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl FromStr for BitField {
    type Err = BitError;

    /// Parses an MSB-first string of '0' and '1' characters.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bits = s
            .chars()
            .rev()
            .map(|c| match c {
                '0' => Ok(false),
                '1' => Ok(true),
                other => Err(BitError::InvalidDigit(other)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BitField { bits })
    }
}
