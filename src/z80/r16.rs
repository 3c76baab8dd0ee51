use std::ops::{AddAssign, SubAssign};

/// A 16-bit register pair whose halves are separately addressable.
///
/// The high byte is the first-named register of the pair (B in BC, H in HL),
/// matching the Z80 convention that pairs read big-endian.
#[derive(Copy, Clone, Default)]
pub struct R16(u16);

impl R16 {
    #[inline]
    pub fn as_u16(self) -> u16 {
        self.0
    }
    #[inline]
    pub fn set(&mut self, w: u16) {
        self.0 = w;
    }
    #[inline]
    pub fn lo(self) -> u8 {
        self.0 as u8
    }
    #[inline]
    pub fn hi(self) -> u8 {
        (self.0 >> 8) as u8
    }
    #[inline]
    pub fn set_lo(&mut self, b: u8) {
        self.0 = (self.0 & 0xff00) | b as u16;
    }
    #[inline]
    pub fn set_hi(&mut self, b: u8) {
        self.0 = (self.0 & 0x00ff) | ((b as u16) << 8);
    }
}

impl From<R16> for u16 {
    fn from(r: R16) -> Self {
        r.as_u16()
    }
}

impl From<u16> for R16 {
    fn from(w: u16) -> Self {
        R16(w)
    }
}

impl AddAssign<u16> for R16 {
    fn add_assign(&mut self, r: u16) {
        self.0 = self.0.wrapping_add(r);
    }
}

impl SubAssign<u16> for R16 {
    fn sub_assign(&mut self, r: u16) {
        self.0 = self.0.wrapping_sub(r);
    }
}
