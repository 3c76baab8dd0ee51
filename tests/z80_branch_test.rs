use zed80::z80::{Cpu, FLAG_C, FLAG_Z};

mod common;
use common::TestBus;

// --- JR/DJNZ ---

#[test]
fn test_jr_forward() {
    let mut cpu = Cpu::new();
    let mut bus = TestBus::new();
    bus.load(0, &[0x18, 0x10]); // JR +0x10

    let t = cpu.step(&mut bus);
    assert_eq!(t, 12, "JR should be 12 T-states");
    assert_eq!(cpu.pc(), 0x0012);
}

#[test]
fn test_jr_self_loop() {
    let mut cpu = Cpu::new();
    let mut bus = TestBus::new();
    bus.load(0x0100, &[0x18, 0xfe]); // JR -2: jumps at itself
    cpu.set_pc(0x0100);

    cpu.step(&mut bus);
    assert_eq!(cpu.pc(), 0x0100, "displacement -2 re-executes the JR");
    cpu.step(&mut bus);
    assert_eq!(cpu.pc(), 0x0100);
}

#[test]
fn test_jr_cc_taken_and_not_taken() {
    let mut cpu = Cpu::new();
    let mut bus = TestBus::new();
    cpu.set_f(0x00);
    bus.load(0, &[0x28, 0x10, 0x20, 0x10]); // JR Z,+0x10; JR NZ,+0x10

    let t = cpu.step(&mut bus);
    assert_eq!(t, 7, "branch not taken costs 7");
    assert_eq!(cpu.pc(), 0x0002);

    let t = cpu.step(&mut bus);
    assert_eq!(t, 12, "branch taken costs 12");
    assert_eq!(cpu.pc(), 0x0014);
}

#[test]
fn test_djnz_iterates_then_falls_through() {
    let mut cpu = Cpu::new();
    let mut bus = TestBus::new();
    cpu.set_bc(0x0200); // B = 2
    bus.load(0x0100, &[0x10, 0xfe]); // DJNZ -2
    cpu.set_pc(0x0100);

    let t = cpu.step(&mut bus);
    assert_eq!(t, 13, "taken DJNZ costs 13");
    assert_eq!(cpu.pc(), 0x0100, "looped once");
    assert_eq!(cpu.b(), 0x01);

    let t = cpu.step(&mut bus);
    assert_eq!(t, 8, "fall-through DJNZ costs 8");
    assert_eq!(cpu.pc(), 0x0102);
    assert_eq!(cpu.b(), 0x00);
}

// --- JP ---

#[test]
fn test_jp_absolute() {
    let mut cpu = Cpu::new();
    let mut bus = TestBus::new();
    bus.load(0, &[0xc3, 0x34, 0x12]); // JP 0x1234

    let t = cpu.step(&mut bus);
    assert_eq!(t, 10);
    assert_eq!(cpu.pc(), 0x1234);
}

#[test]
fn test_jp_cc_charges_ten_either_way() {
    let mut cpu = Cpu::new();
    let mut bus = TestBus::new();
    cpu.set_f(FLAG_C);
    bus.load(0, &[0xd2, 0x00, 0x20, 0xda, 0x00, 0x20]); // JP NC,0x2000; JP C,0x2000

    let t = cpu.step(&mut bus);
    assert_eq!(t, 10, "JP cc is 10 T-states not taken");
    assert_eq!(cpu.pc(), 0x0003);

    let t = cpu.step(&mut bus);
    assert_eq!(t, 10, "JP cc is 10 T-states taken");
    assert_eq!(cpu.pc(), 0x2000);
}

#[test]
fn test_jp_hl() {
    let mut cpu = Cpu::new();
    let mut bus = TestBus::new();
    cpu.set_hl(0x8000);
    bus.load(0, &[0xe9]); // JP (HL)

    let t = cpu.step(&mut bus);
    assert_eq!(t, 4);
    assert_eq!(cpu.pc(), 0x8000);
}

// --- CALL/RET ---

#[test]
fn test_call_and_ret() {
    let mut cpu = Cpu::new();
    let mut bus = TestBus::new();
    cpu.set_sp(0xfffe);
    bus.load(0, &[0xcd, 0x00, 0x10]); // CALL 0x1000
    bus.load(0x1000, &[0xc9]); // RET

    let t = cpu.step(&mut bus);
    assert_eq!(t, 17, "CALL costs 17");
    assert_eq!(cpu.pc(), 0x1000);
    assert_eq!(cpu.sp(), 0xfffc);
    assert_eq!(bus.memory[0xfffc], 0x03, "return address low byte");
    assert_eq!(bus.memory[0xfffd], 0x00, "return address high byte");

    let t = cpu.step(&mut bus);
    assert_eq!(t, 10, "RET costs 10");
    assert_eq!(cpu.pc(), 0x0003);
    assert_eq!(cpu.sp(), 0xfffe);
}

#[test]
fn test_call_cc_not_taken() {
    let mut cpu = Cpu::new();
    let mut bus = TestBus::new();
    cpu.set_sp(0xfffe);
    cpu.set_f(0x00);
    bus.load(0, &[0xcc, 0x00, 0x10]); // CALL Z,0x1000

    let t = cpu.step(&mut bus);
    assert_eq!(t, 10, "untaken CALL cc costs 10");
    assert_eq!(cpu.pc(), 0x0003);
    assert_eq!(cpu.sp(), 0xfffe, "nothing pushed");
}

#[test]
fn test_ret_cc_timing() {
    let mut cpu = Cpu::new();
    let mut bus = TestBus::new();
    cpu.set_sp(0xfff0);
    bus.memory[0xfff0] = 0x00;
    bus.memory[0xfff1] = 0x20;
    cpu.set_f(FLAG_Z);
    bus.load(0, &[0xc0, 0xc8]); // RET NZ; RET Z

    let t = cpu.step(&mut bus);
    assert_eq!(t, 5, "untaken RET cc costs 5");
    assert_eq!(cpu.pc(), 0x0001);

    let t = cpu.step(&mut bus);
    assert_eq!(t, 11, "taken RET cc costs 11");
    assert_eq!(cpu.pc(), 0x2000);
    assert_eq!(cpu.sp(), 0xfff2);
}

// --- RST ---

#[test]
fn test_rst_pushes_and_jumps() {
    let mut cpu = Cpu::new();
    let mut bus = TestBus::new();
    cpu.set_sp(0xfffe);
    bus.load(0x0200, &[0xdf]); // RST 18h
    cpu.set_pc(0x0200);

    let t = cpu.step(&mut bus);
    assert_eq!(t, 11, "RST costs 11");
    assert_eq!(cpu.pc(), 0x0018);
    assert_eq!(bus.memory[0xfffc], 0x01, "pushed PC low");
    assert_eq!(bus.memory[0xfffd], 0x02, "pushed PC high");
}

// --- condition decoding across the flag set ---

#[test]
fn test_parity_and_sign_conditions() {
    let mut cpu = Cpu::new();
    let mut bus = TestBus::new();
    cpu.set_f(0x00); // PV clear, S clear
    bus.load(
        0,
        &[
            0xe2, 0x00, 0x10, // JP PO,0x1000 (taken: parity odd)
            0x00,
        ],
    );
    bus.load(0x1000, &[0xf2, 0x00, 0x20]); // JP P,0x2000 (taken: positive)

    cpu.step(&mut bus);
    assert_eq!(cpu.pc(), 0x1000);
    cpu.step(&mut bus);
    assert_eq!(cpu.pc(), 0x2000);
}

#[test]
fn test_halt_stops_advancing() {
    let mut cpu = Cpu::new();
    let mut bus = TestBus::new();
    bus.load(0x0300, &[0x76]); // HALT
    cpu.set_pc(0x0300);

    let t = cpu.step(&mut bus);
    assert_eq!(t, 4);
    assert!(cpu.halted());
    assert_eq!(cpu.pc(), 0x0300, "PC stays on the HALT opcode");

    let t = cpu.step(&mut bus);
    assert_eq!(t, 4, "halted steps cost 4 T-states");
    assert_eq!(cpu.pc(), 0x0300);
    assert_eq!(bus.memory[0x0300], 0x76);
}
