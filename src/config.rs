use regex::Regex;
use thiserror::Error;

/// Errors that can occur while parsing command-line flags.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum CliError {
    #[error("invalid command line flag")]
    InvalidCommandLineFlag,
    #[error("invalid port flag value")]
    InvalidPortFlagValue,
    #[error("invalid host flag value")]
    InvalidHostFlagValue,
    #[error("invalid master address")]
    InvalidMasterAddress,
    #[error("invalid master port")]
    InvalidMasterPort,
}

/// Runtime configuration from the command line.
///
/// Supported flags:
/// * `--port <port>` — port to listen on (default: 6379)
/// * `--host <host>` — address to bind (default: 0.0.0.0)
/// * `--replicaof "<host> <port>"` — run as a replica of the given master
#[derive(Debug, PartialEq, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub replica_of: Option<(String, u16)>,
}

impl Config {
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self, CliError> {
        let mut iter = args.into_iter().skip(1);
        let mut host: Option<String> = None;
        let mut port: Option<u16> = None;
        let mut replica_of: Option<(String, u16)> = None;

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--port" => {
                    let Some(value) = iter.next() else {
                        return Err(CliError::InvalidCommandLineFlag);
                    };
                    port = Some(validate_port(&value, CliError::InvalidPortFlagValue)?);
                }
                "--host" => {
                    let Some(value) = iter.next() else {
                        return Err(CliError::InvalidCommandLineFlag);
                    };
                    if !is_valid_host(&value) {
                        return Err(CliError::InvalidHostFlagValue);
                    }
                    host = Some(value);
                }
                "--replicaof" => {
                    let Some(value) = iter.next() else {
                        return Err(CliError::InvalidCommandLineFlag);
                    };
                    replica_of = Some(validate_master_address(&value)?);
                }
                _ => return Err(CliError::InvalidCommandLineFlag),
            }
        }

        Ok(Config {
            host: host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: port.unwrap_or(6379),
            replica_of,
        })
    }
}

fn validate_port(port: &str, error: CliError) -> Result<u16, CliError> {
    let port = port.parse::<u32>().map_err(|_| error.clone())?;
    if !(1..=65535).contains(&port) {
        return Err(error);
    }
    Ok(port as u16)
}

/// Hosts are IPv4 addresses or hostnames; IPv4 octets must fit a byte.
fn is_valid_host(host: &str) -> bool {
    let ipv4 = Regex::new(r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})$")
        .expect("ipv4 pattern is valid");
    let hostname = Regex::new(r"^[a-zA-Z0-9\-\.]+$").expect("hostname pattern is valid");

    if let Some(caps) = ipv4.captures(host) {
        return caps.iter().skip(1).all(|octet| {
            octet
                .map(|m| m.as_str().parse::<u16>().map(|v| v <= 255).unwrap_or(false))
                .unwrap_or(false)
        });
    }
    hostname.is_match(host)
}

/// Parses the `--replicaof` value: `"<host> <port>"`, space-separated.
fn validate_master_address(master_address: &str) -> Result<(String, u16), CliError> {
    let parts: Vec<&str> = master_address.split_whitespace().collect();
    if parts.len() != 2 {
        return Err(CliError::InvalidMasterAddress);
    }
    if !is_valid_host(parts[0]) {
        return Err(CliError::InvalidMasterAddress);
    }
    let port = validate_port(parts[1], CliError::InvalidMasterPort)?;
    Ok((parts[0].to_string(), port))
}
