use super::*;

//ED map. The index substitution never applies here: a DD or FD in front of
//ED is a wasted prefix, already charged by the caller. Every opcode the map
//leaves unassigned is an 8 T-state no-op.

impl Cpu {
    //LD A,I and LD A,R share one rule: P/V reflects IFF2, the rest follows
    //the plain SZ53 derivation, C is preserved.
    fn ld_a_ir_flags(&mut self, val: u8) {
        let mut f = (self.f() & FLAG_C) | sz53(val);
        if self.iff2 {
            f |= FLAG_PV;
        }
        self.set_a(val);
        self.set_f(f);
    }

    pub(super) fn exec_ed(&mut self, prefix: XYPrefix, bus: &mut impl Bus) -> u32 {
        if prefix == XYPrefix::None {
            self.inc_r();
        }
        let op = self.fetch(bus);
        let x = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;
        let p = y >> 1;
        let q = y & 1;
        if x == 1 {
            match z {
                0 => {
                    //IN r,(C); y=6 is the flags-only IN (C)
                    let port = self.bc.as_u16();
                    let val = bus.do_in(port);
                    if y != 6 {
                        self.set_reg8(XYPrefix::None, y, val);
                    }
                    let f = (self.f() & FLAG_C) | sz53p(val);
                    self.set_f(f);
                    12
                }
                1 => {
                    //OUT (C),r; y=6 is the undocumented OUT (C),0
                    let port = self.bc.as_u16();
                    let val = if y == 6 {
                        0
                    } else {
                        self.reg8(XYPrefix::None, y)
                    };
                    bus.do_out(port, val);
                    12
                }
                2 => {
                    //SBC HL,rp / ADC HL,rp
                    let hl = self.hl.as_u16();
                    let val = self.rp(XYPrefix::None, p);
                    let r = if q == 0 {
                        self.sbc16_flags(hl, val)
                    } else {
                        self.adc16_flags(hl, val)
                    };
                    self.hl.set(r);
                    15
                }
                3 => {
                    //LD (nn),rp / LD rp,(nn)
                    let addr = self.fetch_u16(bus);
                    if q == 0 {
                        let v = self.rp(XYPrefix::None, p);
                        bus.poke_u16(addr, v);
                    } else {
                        let v = bus.peek_u16(addr);
                        self.set_rp(XYPrefix::None, p, v);
                    }
                    20
                }
                4 => {
                    //NEG (every slot in this column)
                    let a = self.a();
                    let r = self.sub_flags(0, a, false);
                    self.set_a(r);
                    8
                }
                5 => {
                    //RETN / RETI: both restore IFF1 from IFF2.
                    self.iff1 = self.iff2;
                    let pc = self.pop(bus);
                    self.pc.set(pc);
                    14
                }
                6 => {
                    //IM 0/1/2, with the undocumented aliases
                    self.im = match y & 3 {
                        2 => InterruptMode::IM1,
                        3 => InterruptMode::IM2,
                        _ => InterruptMode::IM0,
                    };
                    8
                }
                _ => match y {
                    0 => {
                        //LD I,A
                        self.i = self.a();
                        9
                    }
                    1 => {
                        //LD R,A
                        let a = self.a();
                        self.set_r(a);
                        9
                    }
                    2 => {
                        //LD A,I
                        let i = self.i;
                        self.ld_a_ir_flags(i);
                        9
                    }
                    3 => {
                        //LD A,R
                        let r = self.r();
                        self.ld_a_ir_flags(r);
                        9
                    }
                    4 => {
                        //RRD: low nibbles rotate right through A and (HL).
                        let m = bus.peek(self.hl);
                        let a = self.a();
                        let new_a = (a & 0xf0) | (m & 0x0f);
                        let new_m = ((a & 0x0f) << 4) | (m >> 4);
                        bus.poke(self.hl, new_m);
                        let f = (self.f() & FLAG_C) | sz53p(new_a);
                        self.set_a(new_a);
                        self.set_f(f);
                        18
                    }
                    5 => {
                        //RLD
                        let m = bus.peek(self.hl);
                        let a = self.a();
                        let new_a = (a & 0xf0) | (m >> 4);
                        let new_m = (m << 4) | (a & 0x0f);
                        bus.poke(self.hl, new_m);
                        let f = (self.f() & FLAG_C) | sz53p(new_a);
                        self.set_a(new_a);
                        self.set_f(f);
                        18
                    }
                    _ => 8, //ED-prefixed NOP
                },
            }
        } else if x == 2 && z <= 3 && y >= 4 {
            let dir = if y & 1 == 0 {
                Direction::Inc
            } else {
                Direction::Dec
            };
            let repeat = y >= 6;
            match z {
                0 => {
                    //LDI/LDD/LDIR/LDDR
                    self.ldi_ldd(dir, bus);
                    if repeat && self.bc.as_u16() != 0 {
                        self.pc -= 2;
                        21
                    } else {
                        16
                    }
                }
                1 => {
                    //CPI/CPD/CPIR/CPDR: also stop on a match
                    let r = self.cpi_cpd(dir, bus);
                    if repeat && self.bc.as_u16() != 0 && r != 0 {
                        self.pc -= 2;
                        21
                    } else {
                        16
                    }
                }
                2 => {
                    //INI/IND/INIR/INDR: B is the loop counter
                    let b = self.ini_ind(dir, bus);
                    if repeat && b != 0 {
                        self.pc -= 2;
                        21
                    } else {
                        16
                    }
                }
                _ => {
                    //OUTI/OUTD/OTIR/OTDR
                    let b = self.outi_outd(dir, bus);
                    if repeat && b != 0 {
                        self.pc -= 2;
                        21
                    } else {
                        16
                    }
                }
            }
        } else {
            8 //unassigned ED opcode
        }
    }
}
