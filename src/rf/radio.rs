/// nRF24L01 register-level access: channel 5, 2 Mbps, dynamic payloads,
/// CRC16, two reading pipes bound to caller-supplied addresses. No driver
/// for this radio exists anywhere in the retrieved pack, so this talks to
/// the chip directly over `spidev` + `gpio_cdev` rather than wrapping an
/// existing crate.

#[derive(Debug)]
pub enum RadioError {
    Spi(String),
    Gpio(String),
    NotResponding,
}

impl std::fmt::Display for RadioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RadioError::Spi(e) => write!(f, "spi error: {e}"),
            RadioError::Gpio(e) => write!(f, "gpio error: {e}"),
            RadioError::NotResponding => write!(f, "RF hardware is not responding"),
        }
    }
}

impl std::error::Error for RadioError {}

/// Minimal radio surface the listener depends on, so the press/repeat/
/// release decode loop is unit-testable without real SPI/GPIO.
pub trait RfRadio: Send {
    fn power_up(&mut self) -> Result<(), RadioError>;
    fn power_down(&mut self) -> Result<(), RadioError>;
    fn open_reading_pipes(&mut self, addr1: &[u8; 5], addr2: &[u8; 5]) -> Result<(), RadioError>;
    fn start_listening(&mut self) -> Result<(), RadioError>;
    fn available(&mut self) -> bool;
    /// Reads the next dynamic payload. Returns an empty vec if none is ready.
    fn read(&mut self) -> Vec<u8>;
}

#[cfg(target_os = "linux")]
pub mod spidev_radio {
    use super::*;
    use gpio_cdev::{Chip, LineRequestFlags};
    use spidev::{SpiModeFlags, Spidev, SpidevOptions};
    use std::time::Duration;

    // Subset of the nRF24L01 register map needed to bring the radio up in
    // receive mode. Matches the boot sequence in the original driver:
    // channel 5, 2 Mbps, CRC16, dynamic payloads enabled, two reading pipes.
    mod regs {
        pub const CONFIG: u8 = 0x00;
        pub const EN_AA: u8 = 0x01;
        pub const EN_RXADDR: u8 = 0x02;
        pub const RF_CH: u8 = 0x05;
        pub const RF_SETUP: u8 = 0x06;
        pub const STATUS: u8 = 0x07;
        pub const RX_ADDR_P1: u8 = 0x0B;
        pub const RX_ADDR_P2: u8 = 0x0C;
        pub const RX_PW_P1: u8 = 0x11;
        pub const RX_PW_P2: u8 = 0x12;
        pub const DYNPD: u8 = 0x1C;
        pub const FEATURE: u8 = 0x1D;
        pub const R_RX_PL_WID: u8 = 0x60;
        pub const R_RX_PAYLOAD: u8 = 0x61;
        pub const W_REGISTER: u8 = 0x20;
    }

    pub struct SpidevRadio {
        spi: Spidev,
        ce: gpio_cdev::LineHandle,
    }

    impl SpidevRadio {
        pub fn open(spi_path: &str, ce_pin: u32) -> Result<Self, RadioError> {
            let mut spi = Spidev::open(spi_path).map_err(|e| RadioError::Spi(e.to_string()))?;
            let options = SpidevOptions::new()
                .bits_per_word(8)
                .max_speed_hz(8_000_000)
                .mode(SpiModeFlags::SPI_MODE_0)
                .build();
            spi.configure(&options).map_err(|e| RadioError::Spi(e.to_string()))?;

            let mut chip = Chip::new("/dev/gpiochip0").map_err(|e| RadioError::Gpio(e.to_string()))?;
            let ce = chip
                .get_line(ce_pin)
                .map_err(|e| RadioError::Gpio(e.to_string()))?
                .request(LineRequestFlags::OUTPUT, 0, "equilibrium-rf-ce")
                .map_err(|e| RadioError::Gpio(e.to_string()))?;

            let mut radio = Self { spi, ce };
            radio.write_register(regs::EN_AA, &[0x00])?; // no auto-ack
            radio.write_register(regs::EN_RXADDR, &[0x06])?; // pipes 1+2
            radio.write_register(regs::RF_CH, &[5])?;
            radio.write_register(regs::RF_SETUP, &[0x0E])?; // 2Mbps, 0dBm
            radio.write_register(regs::CONFIG, &[0x0B])?; // CRC enabled, 2-byte, PRX
            radio.write_register(regs::FEATURE, &[0x04])?; // EN_DPL
            radio.write_register(regs::DYNPD, &[0x06])?; // dynamic payload pipes 1+2
            Ok(radio)
        }

        fn write_register(&mut self, reg: u8, data: &[u8]) -> Result<(), RadioError> {
            use std::io::Write;
            let mut buf = vec![regs::W_REGISTER | reg];
            buf.extend_from_slice(data);
            self.spi.write_all(&buf).map_err(|e| RadioError::Spi(e.to_string()))
        }

        fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), RadioError> {
            use spidev::SpidevTransfer;
            let mut transfer = SpidevTransfer::read_write(tx, rx);
            self.spi.transfer(&mut transfer).map_err(|e| RadioError::Spi(e.to_string()))
        }
    }

    impl RfRadio for SpidevRadio {
        fn power_up(&mut self) -> Result<(), RadioError> {
            self.write_register(regs::CONFIG, &[0x0B])?;
            std::thread::sleep(Duration::from_millis(5));
            Ok(())
        }

        fn power_down(&mut self) -> Result<(), RadioError> {
            self.write_register(regs::CONFIG, &[0x08])
        }

        fn open_reading_pipes(&mut self, addr1: &[u8; 5], addr2: &[u8; 5]) -> Result<(), RadioError> {
            let mut buf1 = vec![regs::W_REGISTER | regs::RX_ADDR_P1];
            buf1.extend_from_slice(addr1);
            use std::io::Write;
            self.spi.write_all(&buf1).map_err(|e| RadioError::Spi(e.to_string()))?;
            self.write_register(regs::RX_ADDR_P2, &addr2[..1])?; // pipe 2 shares bytes 1-4 with pipe 1
            self.write_register(regs::RX_PW_P1, &[32])?;
            self.write_register(regs::RX_PW_P2, &[32])
        }

        fn start_listening(&mut self) -> Result<(), RadioError> {
            self.ce.set_value(1).map_err(|e| RadioError::Gpio(e.to_string()))?;
            std::thread::sleep(Duration::from_micros(130));
            Ok(())
        }

        fn available(&mut self) -> bool {
            let mut rx = [0u8; 2];
            if self.transfer(&[regs::STATUS], &mut rx).is_err() {
                return false;
            }
            rx[1] & 0x40 != 0 // RX_DR
        }

        fn read(&mut self) -> Vec<u8> {
            let mut width = [0u8; 2];
            if self.transfer(&[regs::R_RX_PL_WID], &mut width).is_err() {
                return Vec::new();
            }
            let len = width[1].min(32) as usize;
            if len == 0 {
                return Vec::new();
            }
            let tx = vec![regs::R_RX_PAYLOAD; len + 1];
            let mut rx = vec![0u8; len + 1];
            if self.transfer(&tx, &mut rx).is_err() {
                return Vec::new();
            }
            rx[1..].to_vec()
        }
    }
}

/// Test double driven entirely by queued payloads, for exercising
/// `Listener`'s decode loop without real SPI/GPIO.
#[derive(Default)]
pub struct FakeRadio {
    pub queue: std::collections::VecDeque<Vec<u8>>,
    pub powered: bool,
}

impl FakeRadio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, payload: Vec<u8>) {
        self.queue.push_back(payload);
    }
}

impl RfRadio for FakeRadio {
    fn power_up(&mut self) -> Result<(), RadioError> {
        self.powered = true;
        Ok(())
    }

    fn power_down(&mut self) -> Result<(), RadioError> {
        self.powered = false;
        Ok(())
    }

    fn open_reading_pipes(&mut self, _addr1: &[u8; 5], _addr2: &[u8; 5]) -> Result<(), RadioError> {
        Ok(())
    }

    fn start_listening(&mut self) -> Result<(), RadioError> {
        Ok(())
    }

    fn available(&mut self) -> bool {
        !self.queue.is_empty()
    }

    fn read(&mut self) -> Vec<u8> {
        self.queue.pop_front().unwrap_or_default()
    }
}
