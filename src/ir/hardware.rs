/// Hardware seam for the IR transceiver: production code drives a real GPIO
/// LED/receiver pair, tests drive a fake that records/replays pulse arrays
/// without touching any device node.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::PulseArray;

#[async_trait]
pub trait IrHardware: Send + Sync {
    /// Modulates `pulses` onto the transmitter at the configured carrier
    /// frequency; resolves when the last space has elapsed.
    async fn transmit(&self, pulses: &PulseArray) -> Result<()>;

    /// Demodulates receiver GPIO edge timestamps into a pulse array,
    /// stopping once `silence_ms` of trailing idle is observed or
    /// `max_pulses` is reached. `cancel` resolving ends the capture early.
    async fn receive(
        &self,
        silence_ms: u64,
        max_pulses: usize,
        cancel: tokio::sync::watch::Receiver<bool>,
    ) -> Result<PulseArray>;
}

/// Linux GPIO/PWM implementation. The carrier is produced with software PWM
/// on the transmit GPIO; receive demodulates edge timestamps on the receive
/// GPIO into mark/space microsecond durations.
#[cfg(target_os = "linux")]
pub mod rppal_hardware {
    use super::*;
    use std::time::{Duration, Instant};

    pub struct RppalIrHardware {
        tx_gpio: u8,
        rx_gpio: u8,
        carrier_hz: u32,
    }

    impl RppalIrHardware {
        pub fn new(tx_gpio: u8, rx_gpio: u8, carrier_hz: u32) -> Result<Self> {
            Ok(Self { tx_gpio, rx_gpio, carrier_hz })
        }
    }

    #[async_trait]
    impl IrHardware for RppalIrHardware {
        async fn transmit(&self, pulses: &PulseArray) -> Result<()> {
            let tx_gpio = self.tx_gpio;
            let carrier_hz = self.carrier_hz;
            let pulses = pulses.clone();
            tokio::task::spawn_blocking(move || -> Result<()> {
                use rppal::gpio::Gpio;
                use rppal::pwm::{Channel, Polarity, Pwm};

                let _pin = Gpio::new()
                    .map_err(|e| crate::error::Error::TransportUnavailable(e.to_string()))?
                    .get(tx_gpio)
                    .map_err(|e| crate::error::Error::TransportUnavailable(e.to_string()))?;

                let pwm = Pwm::with_frequency(
                    Channel::Pwm0,
                    carrier_hz as f64,
                    0.33,
                    Polarity::Normal,
                    false,
                )
                .map_err(|e| crate::error::Error::TransportUnavailable(e.to_string()))?;

                for (i, &duration_us) in pulses.iter().enumerate() {
                    let is_mark = i % 2 == 0;
                    if is_mark {
                        let _ = pwm.enable();
                    } else {
                        let _ = pwm.disable();
                    }
                    std::thread::sleep(Duration::from_micros(duration_us as u64));
                }
                let _ = pwm.disable();
                Ok(())
            })
            .await
            .map_err(|e| crate::error::Error::Fatal(e.to_string()))?
        }

        async fn receive(
            &self,
            silence_ms: u64,
            max_pulses: usize,
            mut cancel: tokio::sync::watch::Receiver<bool>,
        ) -> Result<PulseArray> {
            let rx_gpio = self.rx_gpio;
            tokio::task::spawn_blocking(move || -> Result<PulseArray> {
                use rppal::gpio::{Gpio, Trigger};

                let gpio = Gpio::new().map_err(|e| crate::error::Error::TransportUnavailable(e.to_string()))?;
                let mut pin = gpio
                    .get(rx_gpio)
                    .map_err(|e| crate::error::Error::TransportUnavailable(e.to_string()))?
                    .into_input();
                pin.set_interrupt(Trigger::Both, None)
                    .map_err(|e| crate::error::Error::TransportUnavailable(e.to_string()))?;

                let mut pulses = Vec::new();
                let mut last_edge = Instant::now();
                loop {
                    if *cancel.borrow() {
                        return Err(crate::error::Error::Cancelled);
                    }
                    match pin.poll_interrupt(false, Some(Duration::from_millis(silence_ms))) {
                        Ok(Some(_)) => {
                            let now = Instant::now();
                            let delta_us = now.duration_since(last_edge).as_micros() as u32;
                            last_edge = now;
                            pulses.push(delta_us.max(1));
                            if pulses.len() >= max_pulses {
                                return Ok(pulses);
                            }
                        }
                        Ok(None) => {
                            if !pulses.is_empty() {
                                return Ok(pulses);
                            }
                        }
                        Err(e) => {
                            return Err(crate::error::Error::TransportFailure(e.to_string()));
                        }
                    }
                }
            })
            .await
            .map_err(|e| crate::error::Error::Fatal(e.to_string()))?
        }
    }
}

/// Test double: records transmitted pulse arrays, replays a queued array on
/// `receive`, and honors cancellation immediately.
pub struct FakeIrHardware {
    pub transmitted: tokio::sync::Mutex<Vec<PulseArray>>,
    pub to_receive: tokio::sync::Mutex<Vec<PulseArray>>,
}

impl FakeIrHardware {
    pub fn new() -> Self {
        Self {
            transmitted: tokio::sync::Mutex::new(Vec::new()),
            to_receive: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn queue_receive(&self, pulses: PulseArray) {
        self.to_receive.lock().await.push(pulses);
    }
}

impl Default for FakeIrHardware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IrHardware for FakeIrHardware {
    async fn transmit(&self, pulses: &PulseArray) -> Result<()> {
        self.transmitted.lock().await.push(pulses.clone());
        Ok(())
    }

    async fn receive(
        &self,
        _silence_ms: u64,
        _max_pulses: usize,
        mut cancel: tokio::sync::watch::Receiver<bool>,
    ) -> Result<PulseArray> {
        if *cancel.borrow() {
            return Err(crate::error::Error::Cancelled);
        }
        tokio::select! {
            _ = cancel.changed() => Err(crate::error::Error::Cancelled),
            popped = async {
                let mut queue = self.to_receive.lock().await;
                queue.pop()
            } => popped.ok_or_else(|| crate::error::Error::TransportFailure("no pulses queued".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_hardware_records_transmit() {
        let hw = FakeIrHardware::new();
        hw.transmit(&vec![1, 2, 3, 4]).await.unwrap();
        assert_eq!(hw.transmitted.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn fake_hardware_replays_queued_receive() {
        let hw = FakeIrHardware::new();
        hw.queue_receive(vec![9000, 4500, 560, 560]).await;
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let pulses = hw.receive(100, 512, rx).await.unwrap();
        assert_eq!(pulses, vec![9000, 4500, 560, 560]);
    }
}
