use std::mem::swap;

mod exec_cb;
mod exec_ed;
mod r16;

use self::r16::R16;

/// Host interface seen by the CPU.
///
/// The core performs no I/O of its own: every opcode fetch, operand access
/// and port transfer goes through one of these four operations. The
/// implementor owns the memory array and any peripherals; multiple `Cpu`
/// instances may coexist as long as each has its own bus.
pub trait Bus {
    fn peek(&mut self, addr: impl Into<u16>) -> u8;
    fn poke(&mut self, addr: impl Into<u16>, value: u8);
    fn do_in(&mut self, port: impl Into<u16>) -> u8;
    fn do_out(&mut self, port: impl Into<u16>, value: u8);

    fn peek_u16(&mut self, addr: impl Into<u16>) -> u16 {
        let addr = addr.into();
        let lo = self.peek(addr) as u16;
        let hi = self.peek(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }
    fn poke_u16(&mut self, addr: impl Into<u16>, data: u16) {
        let addr = addr.into();
        self.poke(addr, data as u8);
        self.poke(addr.wrapping_add(1), (data >> 8) as u8);
    }
}

pub const FLAG_S: u8 = 0b1000_0000;
pub const FLAG_Z: u8 = 0b0100_0000;
pub const FLAG_F5: u8 = 0b0010_0000;
pub const FLAG_H: u8 = 0b0001_0000;
pub const FLAG_F3: u8 = 0b0000_1000;
pub const FLAG_PV: u8 = 0b0000_0100;
pub const FLAG_N: u8 = 0b0000_0010;
pub const FLAG_C: u8 = 0b0000_0001;

//Sign, zero, copies of bits 5/3, and even parity for every byte value.
//Additive operations must mask the parity slot out and OR overflow in.
static SZ53P: [u8; 256] = build_sz53p();

const fn build_sz53p() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut v = 0;
    while v < 256 {
        let b = v as u8;
        let mut f = b & (FLAG_S | FLAG_F5 | FLAG_F3);
        if b == 0 {
            f |= FLAG_Z;
        }
        if b.count_ones() % 2 == 0 {
            f |= FLAG_PV;
        }
        table[v] = f;
        v += 1;
    }
    table
}

#[inline]
fn sz53(v: u8) -> u8 {
    SZ53P[v as usize] & !FLAG_PV
}

#[inline]
fn sz53p(v: u8) -> u8 {
    SZ53P[v as usize]
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
enum InterruptMode {
    IM0,
    IM1,
    IM2,
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
enum XYPrefix {
    None,
    IX,
    IY,
}

#[derive(Clone, Copy)]
enum Direction {
    Inc,
    Dec,
}

/// The complete architectural state of one Z80.
///
/// Created by [`Cpu::new`]; mutates only inside [`Cpu::step`],
/// [`Cpu::interrupt`] and [`Cpu::nmi`].
pub struct Cpu {
    pc: R16,
    sp: R16,
    af: R16,
    af_: R16,
    bc: R16,
    bc_: R16,
    de: R16,
    de_: R16,
    hl: R16,
    hl_: R16,
    ix: R16,
    iy: R16,
    i: u8,
    r_: u8,   //low 7 bits of the refresh counter
    r7: bool, //bit 7 of R, preserved across increments
    iff1: bool,
    iff2: bool,
    im: InterruptMode,
    halted: bool,
    ei_delay: bool,
    clocks: u64,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    /// Power-on state: A=F=0xFF, SP=0xFFFF, everything else zero.
    pub fn new() -> Cpu {
        Cpu {
            pc: R16::default(),
            sp: R16::from(0xffff),
            af: R16::from(0xffff),
            af_: R16::default(),
            bc: R16::default(),
            bc_: R16::default(),
            de: R16::default(),
            de_: R16::default(),
            hl: R16::default(),
            hl_: R16::default(),
            ix: R16::default(),
            iy: R16::default(),
            i: 0,
            r_: 0,
            r7: false,
            iff1: false,
            iff2: false,
            im: InterruptMode::IM0,
            halted: false,
            ei_delay: false,
            clocks: 0,
        }
    }

    pub fn a(&self) -> u8 {
        self.af.hi()
    }
    pub fn set_a(&mut self, a: u8) {
        self.af.set_hi(a);
    }
    pub fn f(&self) -> u8 {
        self.af.lo()
    }
    pub fn set_f(&mut self, f: u8) {
        self.af.set_lo(f);
    }
    pub fn b(&self) -> u8 {
        self.bc.hi()
    }
    pub fn c(&self) -> u8 {
        self.bc.lo()
    }
    pub fn d(&self) -> u8 {
        self.de.hi()
    }
    pub fn e(&self) -> u8 {
        self.de.lo()
    }
    pub fn h(&self) -> u8 {
        self.hl.hi()
    }
    pub fn l(&self) -> u8 {
        self.hl.lo()
    }
    pub fn af(&self) -> u16 {
        self.af.as_u16()
    }
    pub fn bc(&self) -> u16 {
        self.bc.as_u16()
    }
    pub fn de(&self) -> u16 {
        self.de.as_u16()
    }
    pub fn hl(&self) -> u16 {
        self.hl.as_u16()
    }
    pub fn ix(&self) -> u16 {
        self.ix.as_u16()
    }
    pub fn iy(&self) -> u16 {
        self.iy.as_u16()
    }
    pub fn sp(&self) -> u16 {
        self.sp.as_u16()
    }
    pub fn pc(&self) -> u16 {
        self.pc.as_u16()
    }
    pub fn set_af(&mut self, v: u16) {
        self.af.set(v);
    }
    pub fn set_bc(&mut self, v: u16) {
        self.bc.set(v);
    }
    pub fn set_de(&mut self, v: u16) {
        self.de.set(v);
    }
    pub fn set_hl(&mut self, v: u16) {
        self.hl.set(v);
    }
    pub fn set_ix(&mut self, v: u16) {
        self.ix.set(v);
    }
    pub fn set_iy(&mut self, v: u16) {
        self.iy.set(v);
    }
    pub fn set_sp(&mut self, v: u16) {
        self.sp.set(v);
    }
    pub fn set_pc(&mut self, v: u16) {
        self.pc.set(v);
    }
    pub fn i(&self) -> u8 {
        self.i
    }
    pub fn set_i(&mut self, i: u8) {
        self.i = i;
    }
    pub fn r(&self) -> u8 {
        (self.r_ & 0x7f) | if self.r7 { 0x80 } else { 0x00 }
    }
    pub fn set_r(&mut self, r: u8) {
        self.r_ = r;
        self.r7 = r & 0x80 != 0;
    }
    pub fn iff1(&self) -> bool {
        self.iff1
    }
    pub fn set_iff1(&mut self, v: bool) {
        self.iff1 = v;
    }
    pub fn iff2(&self) -> bool {
        self.iff2
    }
    pub fn set_iff2(&mut self, v: bool) {
        self.iff2 = v;
    }
    pub fn im(&self) -> u8 {
        match self.im {
            InterruptMode::IM0 => 0,
            InterruptMode::IM1 => 1,
            InterruptMode::IM2 => 2,
        }
    }
    pub fn set_im(&mut self, im: u8) {
        self.im = match im {
            1 => InterruptMode::IM1,
            2 => InterruptMode::IM2,
            _ => InterruptMode::IM0,
        };
    }
    pub fn halted(&self) -> bool {
        self.halted
    }
    /// Total T-states consumed since power-on.
    pub fn clocks(&self) -> u64 {
        self.clocks
    }

    #[inline]
    fn inc_r(&mut self) {
        self.r_ = self.r_.wrapping_add(1);
    }
    fn fetch(&mut self, bus: &mut impl Bus) -> u8 {
        let b = bus.peek(self.pc);
        self.pc += 1;
        b
    }
    fn fetch_u16(&mut self, bus: &mut impl Bus) -> u16 {
        let lo = self.fetch(bus) as u16;
        let hi = self.fetch(bus) as u16;
        (hi << 8) | lo
    }
    fn push(&mut self, bus: &mut impl Bus, x: impl Into<u16>) {
        let x = x.into();
        self.sp -= 1;
        bus.poke(self.sp, (x >> 8) as u8);
        self.sp -= 1;
        bus.poke(self.sp, x as u8);
    }
    fn pop(&mut self, bus: &mut impl Bus) -> u16 {
        let x = bus.peek_u16(self.sp);
        self.sp += 2;
        x
    }

    fn hlx(&mut self, prefix: XYPrefix) -> &mut R16 {
        match prefix {
            XYPrefix::None => &mut self.hl,
            XYPrefix::IX => &mut self.ix,
            XYPrefix::IY => &mut self.iy,
        }
    }
    fn hx(&self, prefix: XYPrefix) -> u8 {
        match prefix {
            XYPrefix::None => self.hl.hi(),
            XYPrefix::IX => self.ix.hi(),
            XYPrefix::IY => self.iy.hi(),
        }
    }
    fn lx(&self, prefix: XYPrefix) -> u8 {
        match prefix {
            XYPrefix::None => self.hl.lo(),
            XYPrefix::IX => self.ix.lo(),
            XYPrefix::IY => self.iy.lo(),
        }
    }
    fn set_hx(&mut self, prefix: XYPrefix, b: u8) {
        self.hlx(prefix).set_hi(b);
    }
    fn set_lx(&mut self, prefix: XYPrefix, b: u8) {
        self.hlx(prefix).set_lo(b);
    }
    //Effective address of the (HL) operand. With an index prefix active the
    //signed displacement is fetched here and costs 8 extra T-states.
    fn hlx_addr(&mut self, prefix: XYPrefix, bus: &mut impl Bus) -> (u16, u32) {
        match prefix {
            XYPrefix::None => (self.hl.as_u16(), 0),
            XYPrefix::IX => {
                let d = self.fetch(bus);
                (self.ix.as_u16().wrapping_add(d as i8 as i16 as u16), 8)
            }
            XYPrefix::IY => {
                let d = self.fetch(bus);
                (self.iy.as_u16().wrapping_add(d as i8 as i16 as u16), 8)
            }
        }
    }

    //Register operand r[0..7] without the memory slot; H and L give way to
    //the index halves when a prefix is active (undocumented registers).
    fn reg8(&self, prefix: XYPrefix, r: u8) -> u8 {
        match r {
            0 => self.bc.hi(),
            1 => self.bc.lo(),
            2 => self.de.hi(),
            3 => self.de.lo(),
            4 => self.hx(prefix),
            5 => self.lx(prefix),
            7 => self.a(),
            _ => unreachable!("register operand {}", r),
        }
    }
    fn set_reg8(&mut self, prefix: XYPrefix, r: u8, b: u8) {
        match r {
            0 => self.bc.set_hi(b),
            1 => self.bc.set_lo(b),
            2 => self.de.set_hi(b),
            3 => self.de.set_lo(b),
            4 => self.set_hx(prefix, b),
            5 => self.set_lx(prefix, b),
            7 => self.set_a(b),
            _ => unreachable!("register operand {}", r),
        }
    }

    //Register pair rp[0..3]; HL gives way to the index register.
    fn rp(&mut self, prefix: XYPrefix, p: u8) -> u16 {
        match p {
            0 => self.bc.as_u16(),
            1 => self.de.as_u16(),
            2 => self.hlx(prefix).as_u16(),
            3 => self.sp.as_u16(),
            _ => unreachable!("register pair {}", p),
        }
    }
    fn set_rp(&mut self, prefix: XYPrefix, p: u8, v: u16) {
        match p {
            0 => self.bc.set(v),
            1 => self.de.set(v),
            2 => self.hlx(prefix).set(v),
            3 => self.sp.set(v),
            _ => unreachable!("register pair {}", p),
        }
    }
    //PUSH/POP variant: slot 3 is AF.
    fn rp2(&mut self, prefix: XYPrefix, p: u8) -> u16 {
        match p {
            3 => self.af.as_u16(),
            _ => self.rp(prefix, p),
        }
    }
    fn set_rp2(&mut self, prefix: XYPrefix, p: u8, v: u16) {
        match p {
            3 => self.af.set(v),
            _ => self.set_rp(prefix, p, v),
        }
    }

    //Branch condition cc[0..7]: NZ Z NC C PO PE P M.
    fn cond(&self, cc: u8) -> bool {
        let f = self.f();
        match cc {
            0 => f & FLAG_Z == 0,
            1 => f & FLAG_Z != 0,
            2 => f & FLAG_C == 0,
            3 => f & FLAG_C != 0,
            4 => f & FLAG_PV == 0,
            5 => f & FLAG_PV != 0,
            6 => f & FLAG_S == 0,
            7 => f & FLAG_S != 0,
            _ => unreachable!("condition code {}", cc),
        }
    }

    fn add_flags(&mut self, a: u8, b: u8, with_carry: bool) -> u8 {
        let carry = if with_carry && self.f() & FLAG_C != 0 { 1 } else { 0 };
        let full = a as u16 + b as u16 + carry;
        let r = full as u8;
        let mut f = sz53(r);
        if full & 0x100 != 0 {
            f |= FLAG_C;
        }
        if (a ^ b ^ r) & 0x10 != 0 {
            f |= FLAG_H;
        }
        if (a ^ b ^ 0x80) & (a ^ r) & 0x80 != 0 {
            f |= FLAG_PV;
        }
        self.set_f(f);
        r
    }
    fn sub_flags(&mut self, a: u8, b: u8, with_carry: bool) -> u8 {
        let carry = if with_carry && self.f() & FLAG_C != 0 { 1 } else { 0 };
        let full = (a as u16).wrapping_sub(b as u16).wrapping_sub(carry);
        let r = full as u8;
        let mut f = sz53(r) | FLAG_N;
        if full & 0x100 != 0 {
            f |= FLAG_C;
        }
        if (a ^ b ^ r) & 0x10 != 0 {
            f |= FLAG_H;
        }
        if (a ^ b) & (a ^ r) & 0x80 != 0 {
            f |= FLAG_PV;
        }
        self.set_f(f);
        r
    }
    //CP takes F3/F5 from the operand, not the result.
    fn cp_flags(&mut self, a: u8, b: u8) {
        self.sub_flags(a, b, false);
        let f = (self.f() & !(FLAG_F5 | FLAG_F3)) | (b & (FLAG_F5 | FLAG_F3));
        self.set_f(f);
    }
    fn and_flags(&mut self, a: u8, b: u8) -> u8 {
        let r = a & b;
        self.set_f(sz53p(r) | FLAG_H);
        r
    }
    fn xor_flags(&mut self, a: u8, b: u8) -> u8 {
        let r = a ^ b;
        self.set_f(sz53p(r));
        r
    }
    fn or_flags(&mut self, a: u8, b: u8) -> u8 {
        let r = a | b;
        self.set_f(sz53p(r));
        r
    }
    fn inc_flags(&mut self, a: u8) -> u8 {
        let r = a.wrapping_add(1);
        let mut f = (self.f() & FLAG_C) | sz53(r);
        if r & 0x0f == 0 {
            f |= FLAG_H;
        }
        if r == 0x80 {
            f |= FLAG_PV;
        }
        self.set_f(f);
        r
    }
    fn dec_flags(&mut self, a: u8) -> u8 {
        let r = a.wrapping_sub(1);
        let mut f = (self.f() & FLAG_C) | sz53(r) | FLAG_N;
        if a & 0x0f == 0 {
            f |= FLAG_H;
        }
        if a == 0x80 {
            f |= FLAG_PV;
        }
        self.set_f(f);
        r
    }
    //ADD HL,rp: S/Z/PV preserved, H from bit 12, C from bit 16, F3/F5 from
    //the high byte of the result.
    fn add16_flags(&mut self, a: u16, b: u16) -> u16 {
        let full = a as u32 + b as u32;
        let r = full as u16;
        let mut f = (self.f() & (FLAG_S | FLAG_Z | FLAG_PV))
            | ((r >> 8) as u8 & (FLAG_F5 | FLAG_F3));
        if full & 0x1_0000 != 0 {
            f |= FLAG_C;
        }
        if (a ^ b ^ r) & 0x1000 != 0 {
            f |= FLAG_H;
        }
        self.set_f(f);
        r
    }
    fn adc16_flags(&mut self, a: u16, b: u16) -> u16 {
        let carry = if self.f() & FLAG_C != 0 { 1 } else { 0 };
        let full = a as u32 + b as u32 + carry;
        let r = full as u16;
        let mut f = (r >> 8) as u8 & (FLAG_S | FLAG_F5 | FLAG_F3);
        if r == 0 {
            f |= FLAG_Z;
        }
        if full & 0x1_0000 != 0 {
            f |= FLAG_C;
        }
        if (a ^ b ^ r) & 0x1000 != 0 {
            f |= FLAG_H;
        }
        if (a ^ b ^ 0x8000) & (a ^ r) & 0x8000 != 0 {
            f |= FLAG_PV;
        }
        self.set_f(f);
        r
    }
    fn sbc16_flags(&mut self, a: u16, b: u16) -> u16 {
        let carry = if self.f() & FLAG_C != 0 { 1 } else { 0 };
        let full = (a as u32).wrapping_sub(b as u32).wrapping_sub(carry);
        let r = full as u16;
        let mut f = ((r >> 8) as u8 & (FLAG_S | FLAG_F5 | FLAG_F3)) | FLAG_N;
        if r == 0 {
            f |= FLAG_Z;
        }
        if full & 0x1_0000 != 0 {
            f |= FLAG_C;
        }
        if (a ^ b ^ r) & 0x1000 != 0 {
            f |= FLAG_H;
        }
        if (a ^ b) & (a ^ r) & 0x8000 != 0 {
            f |= FLAG_PV;
        }
        self.set_f(f);
        r
    }

    fn alu(&mut self, op: u8, val: u8) {
        let a = self.a();
        let r = match op {
            0 => self.add_flags(a, val, false),
            1 => self.add_flags(a, val, true),
            2 => self.sub_flags(a, val, false),
            3 => self.sub_flags(a, val, true),
            4 => self.and_flags(a, val),
            5 => self.xor_flags(a, val),
            6 => self.or_flags(a, val),
            7 => {
                self.cp_flags(a, val);
                return;
            }
            _ => unreachable!("alu operation {}", op),
        };
        self.set_a(r);
    }

    //The accumulator rotates have a flag rule of their own: S/Z/PV are
    //preserved, H and N cleared, F3/F5 taken from the new A.
    fn rot_a_flags(&mut self, a: u8, carry: bool) {
        let mut f = (self.f() & (FLAG_S | FLAG_Z | FLAG_PV)) | (a & (FLAG_F5 | FLAG_F3));
        if carry {
            f |= FLAG_C;
        }
        self.set_a(a);
        self.set_f(f);
    }

    fn daa(&mut self) {
        let a = self.a();
        let f = self.f();
        let mut correction = 0u8;
        let mut carry = f & FLAG_C;
        if f & FLAG_H != 0 || a & 0x0f > 0x09 {
            correction |= 0x06;
        }
        if carry != 0 || a > 0x99 {
            correction |= 0x60;
            carry = FLAG_C;
        }
        let r = if f & FLAG_N != 0 {
            a.wrapping_sub(correction)
        } else {
            a.wrapping_add(correction)
        };
        self.set_a(r);
        //H records whether the correction toggled bit 4.
        self.set_f(sz53p(r) | carry | (f & FLAG_N) | ((a ^ r) & FLAG_H));
    }

    fn ldi_ldd(&mut self, dir: Direction, bus: &mut impl Bus) {
        let val = bus.peek(self.hl);
        bus.poke(self.de, val);
        match dir {
            Direction::Inc => {
                self.hl += 1;
                self.de += 1;
            }
            Direction::Dec => {
                self.hl -= 1;
                self.de -= 1;
            }
        }
        self.bc -= 1;
        //F3/F5 derive from (value + A): bit 3 and bit 1 respectively.
        let n = val.wrapping_add(self.a());
        let mut f = self.f() & (FLAG_S | FLAG_Z | FLAG_C);
        if self.bc.as_u16() != 0 {
            f |= FLAG_PV;
        }
        f |= n & FLAG_F3;
        if n & 0x02 != 0 {
            f |= FLAG_F5;
        }
        self.set_f(f);
    }
    fn cpi_cpd(&mut self, dir: Direction, bus: &mut impl Bus) -> u8 {
        let val = bus.peek(self.hl);
        let a = self.a();
        let r = a.wrapping_sub(val);
        let hf = (a ^ val ^ r) & 0x10 != 0;
        match dir {
            Direction::Inc => self.hl += 1,
            Direction::Dec => self.hl -= 1,
        }
        self.bc -= 1;
        //F3/F5 derive from (A - (HL) - H): bit 3 and bit 1 respectively.
        let n = r.wrapping_sub(hf as u8);
        let mut f = (self.f() & FLAG_C) | FLAG_N | (r & FLAG_S);
        if r == 0 {
            f |= FLAG_Z;
        }
        if hf {
            f |= FLAG_H;
        }
        if self.bc.as_u16() != 0 {
            f |= FLAG_PV;
        }
        f |= n & FLAG_F3;
        if n & 0x02 != 0 {
            f |= FLAG_F5;
        }
        self.set_f(f);
        r
    }
    fn ini_ind(&mut self, dir: Direction, bus: &mut impl Bus) -> u8 {
        let val = bus.do_in(self.bc.as_u16());
        bus.poke(self.hl, val);
        let b = self.bc.hi().wrapping_sub(1);
        self.bc.set_hi(b);
        match dir {
            Direction::Inc => self.hl += 1,
            Direction::Dec => self.hl -= 1,
        }
        self.in_out_block_flags(b, val);
        b
    }
    fn outi_outd(&mut self, dir: Direction, bus: &mut impl Bus) -> u8 {
        let val = bus.peek(self.hl);
        //B is decremented before the port goes on the bus.
        let b = self.bc.hi().wrapping_sub(1);
        self.bc.set_hi(b);
        bus.do_out(self.bc.as_u16(), val);
        match dir {
            Direction::Inc => self.hl += 1,
            Direction::Dec => self.hl -= 1,
        }
        self.in_out_block_flags(b, val);
        b
    }
    //B is the decremented loop counter and feeds the DEC-style S/Z/F5/F3;
    //N mirrors bit 7 of the transferred value; C and H are left alone.
    fn in_out_block_flags(&mut self, b: u8, val: u8) {
        let mut f = (self.f() & (FLAG_C | FLAG_H)) | sz53(b);
        if val & 0x80 != 0 {
            f |= FLAG_N;
        }
        self.set_f(f);
    }

    /// Execute one instruction, or one 4-T-state HALT quantum, and return
    /// the T-states consumed (also added to [`clocks`](Cpu::clocks)).
    pub fn step(&mut self, bus: &mut impl Bus) -> u32 {
        //EI enables interrupts only after the instruction that follows it.
        if self.ei_delay {
            self.ei_delay = false;
        }
        if self.halted {
            self.inc_r();
            self.clocks += 4;
            return 4;
        }
        self.inc_r();
        let mut t = 0;
        let mut prefix = XYPrefix::None;
        let mut op = self.fetch(bus);
        //DD/FD chains collapse: each prefix byte costs 4 T-states and only
        //the last one selects the index register.
        loop {
            prefix = match op {
                0xdd => XYPrefix::IX,
                0xfd => XYPrefix::IY,
                _ => break,
            };
            t += 4;
            self.inc_r();
            op = self.fetch(bus);
        }
        t += match op {
            0xcb => self.exec_cb(prefix, bus),
            0xed => self.exec_ed(prefix, bus),
            _ => self.exec_main(prefix, op, bus),
        };
        self.clocks += t as u64;
        t
    }

    /// Request a maskable interrupt, with `data` as the byte the device puts
    /// on the bus. Ignored while IFF1 is clear or during the one-instruction
    /// window after EI; pending requests are the caller's concern.
    pub fn interrupt(&mut self, bus: &mut impl Bus, data: u8) {
        if !self.iff1 || self.ei_delay {
            return;
        }
        self.halted = false;
        self.iff1 = false;
        self.iff2 = false;
        self.inc_r();
        let pc = self.pc.as_u16();
        let t = match self.im {
            InterruptMode::IM0 => {
                //Only the RST subset of bus opcodes is honored.
                self.push(bus, pc);
                self.pc.set((data & 0x38) as u16);
                13
            }
            InterruptMode::IM1 => {
                self.push(bus, pc);
                self.pc.set(0x0038);
                13
            }
            InterruptMode::IM2 => {
                self.push(bus, pc);
                let vector = ((self.i as u16) << 8) | (data & 0xfe) as u16;
                let target = bus.peek_u16(vector);
                self.pc.set(target);
                19
            }
        };
        self.clocks += t;
    }

    /// Request a non-maskable interrupt.
    pub fn nmi(&mut self, bus: &mut impl Bus) {
        self.halted = false;
        self.iff2 = self.iff1;
        self.iff1 = false;
        self.ei_delay = false;
        self.inc_r();
        let pc = self.pc.as_u16();
        self.push(bus, pc);
        self.pc.set(0x0066);
        self.clocks += 11;
    }

    //Unprefixed opcode map, decoded through the (x, y, z, p, q) fields.
    //Every arm yields the documented T-state count; prefix bytes, if any,
    //were already charged by the caller.
    fn exec_main(&mut self, prefix: XYPrefix, op: u8, bus: &mut impl Bus) -> u32 {
        let x = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;
        let p = y >> 1;
        let q = y & 1;
        match x {
            0 => match z {
                0 => match y {
                    0 => 4, //NOP
                    1 => {
                        //EX AF,AF'
                        swap(&mut self.af, &mut self.af_);
                        4
                    }
                    2 => {
                        //DJNZ d
                        let d = self.fetch(bus);
                        let b = self.bc.hi().wrapping_sub(1);
                        self.bc.set_hi(b);
                        if b != 0 {
                            self.pc += d as i8 as i16 as u16;
                            13
                        } else {
                            8
                        }
                    }
                    3 => {
                        //JR d
                        let d = self.fetch(bus);
                        self.pc += d as i8 as i16 as u16;
                        12
                    }
                    _ => {
                        //JR cc,d
                        let d = self.fetch(bus);
                        if self.cond(y - 4) {
                            self.pc += d as i8 as i16 as u16;
                            12
                        } else {
                            7
                        }
                    }
                },
                1 => {
                    if q == 0 {
                        //LD rp,nn
                        let nn = self.fetch_u16(bus);
                        self.set_rp(prefix, p, nn);
                        10
                    } else {
                        //ADD HL,rp
                        let hl = self.hlx(prefix).as_u16();
                        let val = self.rp(prefix, p);
                        let r = self.add16_flags(hl, val);
                        self.hlx(prefix).set(r);
                        11
                    }
                }
                2 => match (p, q) {
                    (0, 0) => {
                        //LD (BC),A
                        let a = self.a();
                        bus.poke(self.bc, a);
                        7
                    }
                    (0, _) => {
                        //LD A,(BC)
                        let a = bus.peek(self.bc);
                        self.set_a(a);
                        7
                    }
                    (1, 0) => {
                        //LD (DE),A
                        let a = self.a();
                        bus.poke(self.de, a);
                        7
                    }
                    (1, _) => {
                        //LD A,(DE)
                        let a = bus.peek(self.de);
                        self.set_a(a);
                        7
                    }
                    (2, 0) => {
                        //LD (nn),HL
                        let addr = self.fetch_u16(bus);
                        let hl = self.hlx(prefix).as_u16();
                        bus.poke_u16(addr, hl);
                        16
                    }
                    (2, _) => {
                        //LD HL,(nn)
                        let addr = self.fetch_u16(bus);
                        let v = bus.peek_u16(addr);
                        self.hlx(prefix).set(v);
                        16
                    }
                    (3, 0) => {
                        //LD (nn),A
                        let addr = self.fetch_u16(bus);
                        let a = self.a();
                        bus.poke(addr, a);
                        13
                    }
                    _ => {
                        //LD A,(nn)
                        let addr = self.fetch_u16(bus);
                        let a = bus.peek(addr);
                        self.set_a(a);
                        13
                    }
                },
                3 => {
                    //INC rp / DEC rp
                    let v = self.rp(prefix, p);
                    let v = if q == 0 {
                        v.wrapping_add(1)
                    } else {
                        v.wrapping_sub(1)
                    };
                    self.set_rp(prefix, p, v);
                    6
                }
                4 => {
                    //INC r
                    if y == 6 {
                        let (addr, extra) = self.hlx_addr(prefix, bus);
                        let v = bus.peek(addr);
                        let v = self.inc_flags(v);
                        bus.poke(addr, v);
                        11 + extra
                    } else {
                        let v = self.reg8(prefix, y);
                        let v = self.inc_flags(v);
                        self.set_reg8(prefix, y, v);
                        4
                    }
                }
                5 => {
                    //DEC r
                    if y == 6 {
                        let (addr, extra) = self.hlx_addr(prefix, bus);
                        let v = bus.peek(addr);
                        let v = self.dec_flags(v);
                        bus.poke(addr, v);
                        11 + extra
                    } else {
                        let v = self.reg8(prefix, y);
                        let v = self.dec_flags(v);
                        self.set_reg8(prefix, y, v);
                        4
                    }
                }
                6 => {
                    //LD r,n
                    if y == 6 {
                        //The displacement precedes the immediate and the
                        //fetches overlap: 10 T-states plain, 15 indexed.
                        let (addr, extra) = self.hlx_addr(prefix, bus);
                        let n = self.fetch(bus);
                        bus.poke(addr, n);
                        if extra != 0 {
                            15
                        } else {
                            10
                        }
                    } else {
                        let n = self.fetch(bus);
                        self.set_reg8(prefix, y, n);
                        7
                    }
                }
                _ => match y {
                    0 => {
                        //RLCA
                        let a = self.a();
                        self.rot_a_flags(a.rotate_left(1), a & 0x80 != 0);
                        4
                    }
                    1 => {
                        //RRCA
                        let a = self.a();
                        self.rot_a_flags(a.rotate_right(1), a & 0x01 != 0);
                        4
                    }
                    2 => {
                        //RLA
                        let a = self.a();
                        let r = (a << 1) | (self.f() & FLAG_C);
                        self.rot_a_flags(r, a & 0x80 != 0);
                        4
                    }
                    3 => {
                        //RRA
                        let a = self.a();
                        let r = (a >> 1) | ((self.f() & FLAG_C) << 7);
                        self.rot_a_flags(r, a & 0x01 != 0);
                        4
                    }
                    4 => {
                        //DAA
                        self.daa();
                        4
                    }
                    5 => {
                        //CPL
                        let a = !self.a();
                        let f = (self.f() & (FLAG_S | FLAG_Z | FLAG_PV | FLAG_C))
                            | (a & (FLAG_F5 | FLAG_F3))
                            | FLAG_H
                            | FLAG_N;
                        self.set_a(a);
                        self.set_f(f);
                        4
                    }
                    6 => {
                        //SCF
                        let f = (self.f() & (FLAG_S | FLAG_Z | FLAG_PV))
                            | (self.a() & (FLAG_F5 | FLAG_F3))
                            | FLAG_C;
                        self.set_f(f);
                        4
                    }
                    _ => {
                        //CCF: H takes the old carry, C inverts.
                        let old_c = self.f() & FLAG_C;
                        let mut f = (self.f() & (FLAG_S | FLAG_Z | FLAG_PV))
                            | (self.a() & (FLAG_F5 | FLAG_F3))
                            | (old_c ^ FLAG_C);
                        if old_c != 0 {
                            f |= FLAG_H;
                        }
                        self.set_f(f);
                        4
                    }
                },
            },
            1 => {
                if y == 6 && z == 6 {
                    //HALT: PC stays on the opcode until an interrupt.
                    self.halted = true;
                    self.pc -= 1;
                    4
                } else if y == 6 {
                    //LD (HL),r: the source register is never substituted.
                    let (addr, extra) = self.hlx_addr(prefix, bus);
                    let v = self.reg8(XYPrefix::None, z);
                    bus.poke(addr, v);
                    7 + extra
                } else if z == 6 {
                    //LD r,(HL): the destination register is never substituted.
                    let (addr, extra) = self.hlx_addr(prefix, bus);
                    let v = bus.peek(addr);
                    self.set_reg8(XYPrefix::None, y, v);
                    7 + extra
                } else {
                    //LD r,r'
                    let v = self.reg8(prefix, z);
                    self.set_reg8(prefix, y, v);
                    4
                }
            }
            2 => {
                //ALU A,r
                if z == 6 {
                    let (addr, extra) = self.hlx_addr(prefix, bus);
                    let v = bus.peek(addr);
                    self.alu(y, v);
                    7 + extra
                } else {
                    let v = self.reg8(prefix, z);
                    self.alu(y, v);
                    4
                }
            }
            _ => match z {
                0 => {
                    //RET cc
                    if self.cond(y) {
                        let pc = self.pop(bus);
                        self.pc.set(pc);
                        11
                    } else {
                        5
                    }
                }
                1 => {
                    if q == 0 {
                        //POP rp2
                        let v = self.pop(bus);
                        self.set_rp2(prefix, p, v);
                        10
                    } else {
                        match p {
                            0 => {
                                //RET
                                let pc = self.pop(bus);
                                self.pc.set(pc);
                                10
                            }
                            1 => {
                                //EXX
                                swap(&mut self.bc, &mut self.bc_);
                                swap(&mut self.de, &mut self.de_);
                                swap(&mut self.hl, &mut self.hl_);
                                4
                            }
                            2 => {
                                //JP (HL)
                                let pc = self.hlx(prefix).as_u16();
                                self.pc.set(pc);
                                4
                            }
                            _ => {
                                //LD SP,HL
                                let v = self.hlx(prefix).as_u16();
                                self.sp.set(v);
                                6
                            }
                        }
                    }
                }
                2 => {
                    //JP cc,nn
                    let addr = self.fetch_u16(bus);
                    if self.cond(y) {
                        self.pc.set(addr);
                    }
                    10
                }
                3 => match y {
                    0 => {
                        //JP nn
                        let addr = self.fetch_u16(bus);
                        self.pc.set(addr);
                        10
                    }
                    2 => {
                        //OUT (n),A: A supplies the high address bits.
                        let n = self.fetch(bus);
                        let a = self.a();
                        let port = ((a as u16) << 8) | n as u16;
                        bus.do_out(port, a);
                        11
                    }
                    3 => {
                        //IN A,(n)
                        let n = self.fetch(bus);
                        let port = ((self.a() as u16) << 8) | n as u16;
                        let v = bus.do_in(port);
                        self.set_a(v);
                        11
                    }
                    4 => {
                        //EX (SP),HL
                        let sp = self.sp.as_u16();
                        let v = bus.peek_u16(sp);
                        let hl = self.hlx(prefix).as_u16();
                        bus.poke_u16(sp, hl);
                        self.hlx(prefix).set(v);
                        19
                    }
                    5 => {
                        //EX DE,HL: never index-substituted.
                        swap(&mut self.de, &mut self.hl);
                        4
                    }
                    6 => {
                        //DI
                        self.iff1 = false;
                        self.iff2 = false;
                        4
                    }
                    7 => {
                        //EI: takes effect after the next instruction.
                        self.iff1 = true;
                        self.iff2 = true;
                        self.ei_delay = true;
                        4
                    }
                    _ => unreachable!("CB prefix reached the main decoder"),
                },
                4 => {
                    //CALL cc,nn
                    let addr = self.fetch_u16(bus);
                    if self.cond(y) {
                        let pc = self.pc.as_u16();
                        self.push(bus, pc);
                        self.pc.set(addr);
                        17
                    } else {
                        10
                    }
                }
                5 => {
                    if q == 0 {
                        //PUSH rp2
                        let v = self.rp2(prefix, p);
                        self.push(bus, v);
                        11
                    } else if p == 0 {
                        //CALL nn
                        let addr = self.fetch_u16(bus);
                        let pc = self.pc.as_u16();
                        self.push(bus, pc);
                        self.pc.set(addr);
                        17
                    } else {
                        unreachable!("prefix byte reached the main decoder")
                    }
                }
                6 => {
                    //ALU A,n
                    let n = self.fetch(bus);
                    self.alu(y, n);
                    7
                }
                _ => {
                    //RST y*8
                    let pc = self.pc.as_u16();
                    self.push(bus, pc);
                    self.pc.set((y as u16) * 8);
                    11
                }
            },
        }
    }
}
