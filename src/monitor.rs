//! Event monitor for debugging and development
//!
//! Connects to the device and prints every decoded event together with the
//! command it would resolve to. Nothing is dispatched and the host is never
//! touched, which makes this the tool for writing a command table.

use colored::*;
use std::time::Instant;
use tracing::info;

use crate::cancel::CancelSignal;
use crate::codec;
use crate::commands::{CommandBinding, CommandTable};
use crate::error::BridgeError;
use crate::event::Event;
use crate::link::Connector;
use crate::supervisor::DeviceTarget;

/// Counters reported when the monitor stops
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MonitorStats {
    pub keys: u64,
    pub analog: u64,
    pub unrecognized: u64,
}

impl MonitorStats {
    pub fn total(&self) -> u64 {
        self.keys + self.analog + self.unrecognized
    }

    fn record(&mut self, event: &Event) {
        match event {
            Event::Key(_) => self.keys += 1,
            Event::Analog(_) => self.analog += 1,
            Event::Unrecognized { .. } => self.unrecognized += 1,
        }
    }
}

/// Print events from one connection until shutdown or disconnect
pub async fn run_monitor(
    connector: &dyn Connector,
    device: &DeviceTarget,
    table: &CommandTable,
    mut shutdown: CancelSignal,
) -> Result<MonitorStats, BridgeError> {
    println!("{}", "=== Keypad Monitor ===".bold().cyan());
    println!("Device: {} @ {} baud", device.path.white(), device.baud);
    println!("Press Ctrl+C to exit\n");

    let mut link = connector.connect(&device.path, device.baud).await?;
    info!("Monitoring {}", link.endpoint());

    let started = Instant::now();
    let mut stats = MonitorStats::default();

    let result = loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            line = link.read_line() => line,
        };

        match line {
            Ok(line) => {
                let event = codec::decode_line(&line);
                stats.record(&event);
                let binding = match &event {
                    Event::Key(key) => table.resolve(key),
                    _ => None,
                };
                println!(
                    "{}",
                    format_event(started.elapsed().as_millis(), &event, binding)
                );
            }
            Err(e) => break Err(e),
        }
    };

    link.close();
    println!(
        "\n{} {} key, {} analog, {} unrecognized",
        "Stopped:".bold(),
        stats.keys,
        stats.analog,
        stats.unrecognized
    );

    result.map(|_| stats)
}

/// One monitor output line
pub fn format_event(elapsed_ms: u128, event: &Event, binding: Option<&CommandBinding>) -> String {
    let timestamp = format!("[{:08}ms]", elapsed_ms).dimmed();

    let (kind, body) = match event {
        Event::Key(key) => ("KEY".green(), key.to_string().bright_green()),
        Event::Analog(sample) => ("POT".yellow(), sample.value.to_string().bright_yellow()),
        Event::Unrecognized { raw } => ("???".red(), raw.bright_black()),
    };

    let resolved = match binding {
        Some(binding) => {
            let target = match &binding.action {
                Some(action) => action.to_string(),
                None => "no action".to_string(),
            };
            format!(" => {} ({})", binding.description.bright_blue(), target)
        }
        None => String::new(),
    };

    format!("{} {} {}{}", timestamp, kind, body, resolved)
}

/// List serial ports the device may be attached to
pub fn list_ports_formatted() {
    println!("\n{}", "=== Available Serial Ports ===".bold().cyan());

    match serialport::available_ports() {
        Ok(ports) if ports.is_empty() => println!("  {}", "No serial ports found".dimmed()),
        Ok(ports) => {
            for port in ports {
                let marker = match port.port_type {
                    serialport::SerialPortType::UsbPort(info) => {
                        let product = info.product.unwrap_or_default();
                        format!("[USB {:04x}:{:04x}] {}", info.vid, info.pid, product).green()
                    }
                    _ => "[OTHER]".yellow(),
                };
                println!("  {} {}", port.port_name, marker);
            }
        }
        Err(e) => println!("  {} {}", "Failed to enumerate ports:".red(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::cancel;
    use crate::event::KeyEvent;
    use crate::link::memory::{MemoryConnector, MemoryLink, Step};
    use std::time::Duration;

    fn device() -> DeviceTarget {
        DeviceTarget {
            path: "/dev/tty.usbmodemTest".to_string(),
            baud: 921_600,
        }
    }

    #[test]
    fn test_format_event_shows_resolved_command() {
        colored::control::set_override(false);
        let table = CommandTable::defaults();
        let key = KeyEvent::down(2, 1);
        let line = format_event(42, &Event::Key(key), table.resolve(&key));

        assert!(line.starts_with("[00000042ms] KEY"));
        assert!(line.contains(&Action::PlayPause.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_counts_until_shutdown() {
        let connector = MemoryConnector::new();
        connector.push_link(MemoryLink::new(vec![
            Step::Line(r#"{"ks":1,"kd":0}"#),
            Step::Line(r#"{"p":33}"#),
            Step::Line("garbage"),
        ]));
        let (canceller, shutdown) = cancel::channel();
        let table = CommandTable::defaults();

        let stop = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });
        let stats = run_monitor(connector.as_ref(), &device(), &table, shutdown)
            .await
            .unwrap();
        stop.await.unwrap();

        assert_eq!(
            stats,
            MonitorStats {
                keys: 1,
                analog: 1,
                unrecognized: 1
            }
        );
        assert_eq!(stats.total(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_reports_disconnect() {
        let connector = MemoryConnector::new();
        connector.push_link(MemoryLink::new(vec![Step::Disconnect]));
        let (_canceller, shutdown) = cancel::channel();

        let result = run_monitor(connector.as_ref(), &device(), &CommandTable::defaults(), shutdown).await;
        assert!(matches!(result, Err(BridgeError::Disconnected(_))));
    }
}
