//! Interactive-mode commands

use crate::error::HubError;

/// Default TCP port for `loopback`
pub const DEFAULT_LOOPBACK_PORT: u16 = 9600;

pub const HELP: &str = "\
Commands:
  bridge <dev1> <dev2>        Relay between two serial ports
  loopback [tcp_port]         TCP loopback server (default 9600)
  tcpserial <dev> <tcp_port>  Expose a serial port over TCP
  list                        List serial ports
  status                      Show running bridges
  stop <id>                   Stop a bridge
  quit                        Stop everything and exit
  help                        Show this help

Use VCOM0 / VCOM1 to address the virtual null-modem pair.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Bridge { first: String, second: String },
    Loopback { port: u16 },
    TcpSerial { device: String, port: u16 },
    List,
    Status,
    Stop { id: u32 },
    Quit,
    Help,
}

impl Command {
    /// Parse one input line; blank lines yield `None`
    pub fn parse(line: &str) -> Result<Option<Self>, HubError> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("bridge", [first, second]) => Command::Bridge {
                first: first.to_string(),
                second: second.to_string(),
            },
            ("loopback", []) => Command::Loopback {
                port: DEFAULT_LOOPBACK_PORT,
            },
            ("loopback", [port]) => Command::Loopback {
                port: parse_number(port)?,
            },
            ("tcpserial", [device, port]) => Command::TcpSerial {
                device: device.to_string(),
                port: parse_number(port)?,
            },
            ("list", []) => Command::List,
            ("status", []) => Command::Status,
            ("stop", [id]) => Command::Stop {
                id: parse_number(id)?,
            },
            ("quit" | "exit", []) => Command::Quit,
            ("help" | "?", []) => Command::Help,
            _ => return Err(HubError::InvalidCommand(line.trim().to_string())),
        };
        Ok(Some(command))
    }
}

fn parse_number<T: std::str::FromStr>(word: &str) -> Result<T, HubError> {
    word.parse()
        .map_err(|_| HubError::InvalidCommand(format!("'{}' is not a valid number", word)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse("bridge /dev/ttyUSB0 VCOM1").unwrap(),
            Some(Command::Bridge {
                first: "/dev/ttyUSB0".into(),
                second: "VCOM1".into()
            })
        );
        assert_eq!(
            Command::parse("loopback").unwrap(),
            Some(Command::Loopback { port: 9600 })
        );
        assert_eq!(
            Command::parse("  TCPSERIAL COM3 7000 ").unwrap(),
            Some(Command::TcpSerial {
                device: "COM3".into(),
                port: 7000
            })
        );
        assert_eq!(Command::parse("stop 2").unwrap(), Some(Command::Stop { id: 2 }));
        assert_eq!(Command::parse("exit").unwrap(), Some(Command::Quit));
        assert_eq!(Command::parse("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(
            Command::parse("bridge onlyone"),
            Err(HubError::InvalidCommand(_))
        ));
        assert!(matches!(
            Command::parse("loopback 70000"),
            Err(HubError::InvalidCommand(_))
        ));
        assert!(matches!(
            Command::parse("frobnicate"),
            Err(HubError::InvalidCommand(_))
        ));
    }
}
