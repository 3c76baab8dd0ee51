use std::io::{self, Write};
use std::path::Path;

use log::debug;

use crate::console::{Console, ConsoleInput};
use crate::memory::Memory;
use crate::serial::Acia;
use crate::z80::{Bus, Cpu};

//T-states per host tick: about a millisecond of guest time between
//terminal polls.
const QUANTUM: u64 = 7373;

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum SystemKind {
    Basic,
    Cpm,
}

/// `.com`/`.cim` means a CP/M transient; everything else is the serial SBC.
pub fn detect_system(path: &Path) -> SystemKind {
    match path.extension() {
        Some(ext)
            if ext.eq_ignore_ascii_case("com") || ext.eq_ignore_ascii_case("cim") =>
        {
            SystemKind::Cpm
        }
        _ => SystemKind::Basic,
    }
}

/// Guess the serial base port by scanning the ROM for `IN A,(n)` (0xDB nn)
/// and `OUT (n),A` (0xD3 nn). A live status/data pair shows both reads and
/// writes on two adjacent ports; the busiest such pair wins.
pub fn detect_serial_port(image: &[u8]) -> u8 {
    let mut in_count = [0u32; 256];
    let mut out_count = [0u32; 256];
    for w in image.windows(2) {
        match w[0] {
            0xdb => in_count[w[1] as usize] += 1,
            0xd3 => out_count[w[1] as usize] += 1,
            _ => {}
        }
    }
    let mut best_port = 0x80;
    let mut best_score = 0;
    for p in 0..255 {
        let ins = in_count[p] + in_count[p + 1];
        let outs = out_count[p] + out_count[p + 1];
        if ins == 0 || outs == 0 {
            continue;
        }
        if ins + outs > best_score {
            best_score = ins + outs;
            best_port = p as u8;
        }
    }
    best_port
}

//The SBC: 64 KiB of memory and an ACIA at base/base+1. Unknown ports read
//0xFF and swallow writes.
struct SbcBus {
    mem: Memory,
    acia: Acia,
    console: Console,
    base: u8,
}

impl Bus for SbcBus {
    fn peek(&mut self, addr: impl Into<u16>) -> u8 {
        self.mem.peek(addr)
    }
    fn poke(&mut self, addr: impl Into<u16>, value: u8) {
        self.mem.poke(addr, value);
    }
    fn do_in(&mut self, port: impl Into<u16>) -> u8 {
        let p = port.into() as u8;
        if p == self.base {
            self.acia.read_status()
        } else if p == self.base.wrapping_add(1) {
            self.acia.read_data()
        } else {
            0xff
        }
    }
    fn do_out(&mut self, port: impl Into<u16>, value: u8) {
        let p = port.into() as u8;
        if p == self.base {
            self.acia.write_control(value);
        } else if p == self.base.wrapping_add(1) {
            self.console.put_byte(value);
        }
    }
}

/// Run the BASIC SBC until the user bails out with Ctrl-].
///
/// The loop alternates a quantum of instructions with one non-blocking
/// terminal poll; a received byte lands in the ACIA and, when the ROM armed
/// the receive interrupt, is announced with RST 38h.
pub fn run_basic(mem: Memory, base: u8) {
    let mut bus = SbcBus {
        mem,
        acia: Acia::new(),
        console: Console::new(),
        base,
    };
    let mut cpu = Cpu::new();
    loop {
        let target = cpu.clocks() + QUANTUM;
        while cpu.clocks() < target {
            cpu.step(&mut bus);
        }
        match bus.console.poll() {
            Some(ConsoleInput::Quit) => break,
            Some(ConsoleInput::Byte(b)) => {
                bus.acia.receive(b);
                if bus.acia.irq_enabled() && cpu.iff1() {
                    cpu.interrupt(&mut bus, 0xff); //RST 38h
                }
            }
            None => {}
        }
    }
}

//CP/M transients see no I/O ports at all; the BDOS shim works on PC alone.
struct CpmBus {
    mem: Memory,
}

impl Bus for CpmBus {
    fn peek(&mut self, addr: impl Into<u16>) -> u8 {
        self.mem.peek(addr)
    }
    fn poke(&mut self, addr: impl Into<u16>, value: u8) {
        self.mem.poke(addr, value);
    }
    fn do_in(&mut self, _port: impl Into<u16>) -> u8 {
        0xff
    }
    fn do_out(&mut self, _port: impl Into<u16>, _value: u8) {}
}

//Returns true when the program asked to terminate (function 0).
fn handle_bdos(cpu: &mut Cpu, bus: &mut CpmBus) -> bool {
    let mut out = io::stdout();
    match cpu.c() {
        0 => return true, //P_TERMCPM
        2 => {
            //C_WRITE: character in E
            let _ = out.write_all(&[cpu.e()]);
            let _ = out.flush();
        }
        9 => {
            //C_WRITESTR: $-terminated string at DE
            let mut addr = cpu.de();
            loop {
                let ch = bus.mem.peek(addr);
                if ch == b'$' {
                    break;
                }
                let _ = out.write_all(&[ch]);
                addr = addr.wrapping_add(1);
                if addr == 0 {
                    break;
                }
            }
            let _ = out.flush();
        }
        f => debug!("ignored BDOS function {}", f),
    }
    //Synthesize the RET from CALL 5.
    let sp = cpu.sp();
    let ret = bus.mem.peek_u16(sp);
    cpu.set_pc(ret);
    cpu.set_sp(sp.wrapping_add(2));
    false
}

/// Run a CP/M transient loaded at 0x0100 until it returns, jumps to the
/// warm-boot vector, halts, or calls BDOS function 0.
pub fn run_cpm(mut mem: Memory) {
    //Return address 0x0000 on the stack gives a plain RET somewhere to go.
    mem.write_raw(0xfffc, 0x00);
    mem.write_raw(0xfffd, 0x00);
    let mut bus = CpmBus { mem };
    let mut cpu = Cpu::new();
    cpu.set_pc(0x0100);
    cpu.set_sp(0xfffc);
    loop {
        if cpu.pc() == 0x0000 || cpu.halted() {
            break;
        }
        if cpu.pc() == 0x0005 {
            if handle_bdos(&mut cpu, &mut bus) {
                break;
            }
            continue;
        }
        cpu.step(&mut bus);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_system_by_extension() {
        assert_eq!(detect_system(Path::new("app.com")), SystemKind::Cpm);
        assert_eq!(detect_system(Path::new("APP.COM")), SystemKind::Cpm);
        assert_eq!(detect_system(Path::new("image.cim")), SystemKind::Cpm);
        assert_eq!(detect_system(Path::new("basic.rom")), SystemKind::Basic);
        assert_eq!(detect_system(Path::new("noext")), SystemKind::Basic);
    }

    #[test]
    fn detect_serial_port_picks_busiest_pair() {
        //status reads on 0x10, control/data writes on 0x10/0x11
        let rom = [
            0xdb, 0x10, //IN A,(0x10)
            0xdb, 0x10,
            0xd3, 0x10, //OUT (0x10),A
            0xd3, 0x11, //OUT (0x11),A
            0xdb, 0x80, //a stray read elsewhere
        ];
        assert_eq!(detect_serial_port(&rom), 0x10);
    }

    #[test]
    fn detect_serial_port_needs_both_directions() {
        //reads only: no pair qualifies, fall back to the default
        let rom = [0xdb, 0x20, 0xdb, 0x21, 0xdb, 0x20];
        assert_eq!(detect_serial_port(&rom), 0x80);
    }

    #[test]
    fn detect_serial_port_defaults_on_empty_image() {
        assert_eq!(detect_serial_port(&[]), 0x80);
    }

    #[test]
    fn cpm_exit_on_rst0_return() {
        //LD A,0x41; RET -- returns to the pushed 0x0000 and stops
        let mut mem = Memory::new();
        mem.write_raw(0x0100, 0x3e);
        mem.write_raw(0x0101, 0x41);
        mem.write_raw(0x0102, 0xc9);
        run_cpm(mem);
    }

    #[test]
    fn cpm_exit_on_halt() {
        let mut mem = Memory::new();
        mem.write_raw(0x0100, 0x76); //HALT
        run_cpm(mem);
    }

    #[test]
    fn bdos_ret_pops_the_caller() {
        let mut mem = Memory::new();
        mem.write_raw(0x2000, 0x34);
        mem.write_raw(0x2001, 0x12);
        let mut bus = CpmBus { mem };
        let mut cpu = Cpu::new();
        cpu.set_sp(0x2000);
        cpu.set_bc(0x00ff); //unknown function: ignored
        assert!(!handle_bdos(&mut cpu, &mut bus));
        assert_eq!(cpu.pc(), 0x1234);
        assert_eq!(cpu.sp(), 0x2002);
    }

    #[test]
    fn bdos_terminate_reports_exit() {
        let mem = Memory::new();
        let mut bus = CpmBus { mem };
        let mut cpu = Cpu::new();
        cpu.set_bc(0x0000);
        assert!(handle_bdos(&mut cpu, &mut bus));
    }
}
