//A two-register serial controller in the 6850 ACIA mold: control/status at
//the base port, data at base+1. Only the bits the ROMs actually use are
//modeled: RDRF, TDRE (always ready) and the receive-interrupt arm.

const STATUS_RDRF: u8 = 0x01;
const STATUS_TDRE: u8 = 0x02;
const CTRL_MASTER_RESET: u8 = 0x03;
const CTRL_RX_IRQ: u8 = 0x80;

pub struct Acia {
    rx_data: u8,
    rx_ready: bool,
    irq_enabled: bool,
}

impl Acia {
    pub fn new() -> Acia {
        Acia {
            rx_data: 0,
            rx_ready: false,
            irq_enabled: false,
        }
    }

    /// Latch a byte from the host terminal into the receive register.
    pub fn receive(&mut self, byte: u8) {
        self.rx_data = byte;
        self.rx_ready = true;
    }

    pub fn irq_enabled(&self) -> bool {
        self.irq_enabled
    }

    pub fn read_status(&self) -> u8 {
        let mut status = STATUS_TDRE;
        if self.rx_ready {
            status |= STATUS_RDRF;
        }
        status
    }

    /// Reading the data register clears RDRF.
    pub fn read_data(&mut self) -> u8 {
        self.rx_ready = false;
        self.rx_data
    }

    pub fn write_control(&mut self, value: u8) {
        if value == CTRL_MASTER_RESET {
            self.rx_ready = false;
            self.irq_enabled = false;
        } else {
            self.irq_enabled = value & CTRL_RX_IRQ != 0;
        }
    }
}

impl Default for Acia {
    fn default() -> Self {
        Self::new()
    }
}
