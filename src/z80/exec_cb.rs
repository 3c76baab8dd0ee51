use super::*;

//CB map: x selects rotate/shift, BIT, RES or SET; y is the rotate kind or
//the bit number; z is the operand. The DDCB/FDCB form reads its displacement
//before the opcode byte and carries the undocumented register-copy side
//effect for z != 6.

impl Cpu {
    fn rot_flags(&mut self, op: u8, val: u8) -> u8 {
        let (r, carry) = match op {
            0 => (val.rotate_left(1), val >> 7),                     //RLC
            1 => (val.rotate_right(1), val & 1),                     //RRC
            2 => ((val << 1) | (self.f() & FLAG_C), val >> 7),       //RL
            3 => ((val >> 1) | ((self.f() & FLAG_C) << 7), val & 1), //RR
            4 => (val << 1, val >> 7),                               //SLA
            5 => ((val >> 1) | (val & 0x80), val & 1),               //SRA
            6 => ((val << 1) | 1, val >> 7),                         //SLL, undocumented
            7 => (val >> 1, val & 1),                                //SRL
            _ => unreachable!("rotate operation {}", op),
        };
        self.set_f(sz53p(r) | carry);
        r
    }

    //BIT only touches flags: Z/PV on a clear bit, S when testing a set bit 7,
    //H always, C preserved. F3/F5 come from `f53_src` because the indexed
    //form takes them from the high byte of the effective address.
    fn bit_flags(&mut self, y: u8, val: u8, f53_src: u8) {
        let tested = val & (1 << y);
        let mut f = (self.f() & FLAG_C) | FLAG_H;
        if tested == 0 {
            f |= FLAG_Z | FLAG_PV;
        }
        f |= tested & FLAG_S;
        f |= f53_src & (FLAG_F5 | FLAG_F3);
        self.set_f(f);
    }

    pub(super) fn exec_cb(&mut self, prefix: XYPrefix, bus: &mut impl Bus) -> u32 {
        if prefix == XYPrefix::None {
            self.exec_cb_plain(bus)
        } else {
            self.exec_cb_indexed(prefix, bus)
        }
    }

    fn exec_cb_plain(&mut self, bus: &mut impl Bus) -> u32 {
        self.inc_r();
        let op = self.fetch(bus);
        let x = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;
        if z == 6 {
            let addr = self.hl.as_u16();
            let val = bus.peek(addr);
            match x {
                0 => {
                    let r = self.rot_flags(y, val);
                    bus.poke(addr, r);
                    15
                }
                1 => {
                    self.bit_flags(y, val, 0);
                    12
                }
                2 => {
                    bus.poke(addr, val & !(1 << y));
                    15
                }
                _ => {
                    bus.poke(addr, val | (1 << y));
                    15
                }
            }
        } else {
            let val = self.reg8(XYPrefix::None, z);
            match x {
                0 => {
                    let r = self.rot_flags(y, val);
                    self.set_reg8(XYPrefix::None, z, r);
                }
                1 => self.bit_flags(y, val, val),
                2 => self.set_reg8(XYPrefix::None, z, val & !(1 << y)),
                _ => self.set_reg8(XYPrefix::None, z, val | (1 << y)),
            }
            8
        }
    }

    //DD CB d op: every operation works on (IX+d); with z != 6 the result is
    //also copied into r[z]. Costs here exclude the 4 T-states the caller
    //already charged for the DD/FD byte.
    fn exec_cb_indexed(&mut self, prefix: XYPrefix, bus: &mut impl Bus) -> u32 {
        let d = self.fetch(bus);
        let op = self.fetch(bus);
        let x = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;
        let addr = self
            .hlx(prefix)
            .as_u16()
            .wrapping_add(d as i8 as i16 as u16);
        let val = bus.peek(addr);
        if x == 1 {
            //BIT y,(IX+d): F3/F5 from the high byte of the address.
            self.bit_flags(y, val, (addr >> 8) as u8);
            16
        } else {
            let r = match x {
                0 => self.rot_flags(y, val),
                2 => val & !(1 << y),
                _ => val | (1 << y),
            };
            bus.poke(addr, r);
            if z != 6 {
                self.set_reg8(XYPrefix::None, z, r);
            }
            19
        }
    }
}
