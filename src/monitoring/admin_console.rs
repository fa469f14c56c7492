use crate::control_system::commands::CommandRequest;
use crate::monitoring::reports::{generate_report_summary, plot_vehicle_trace};
use crate::server::dispatcher::DispatchServer;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

pub const USAGE: &str = "Commands:
  DELAY <vehicle_id> <seconds>
  REROUTE <vehicle_id>
  SHUTDOWN <vehicle_id>
  START_ROUTE <vehicle_id>
  REGISTRY
  REPORT
  PLOT <vehicle_id>
  EXIT";

#[derive(Debug, Clone, PartialEq)]
pub enum AdminAction {
    Command(CommandRequest),
    Registry,
    Report,
    Plot(String),
    Exit,
}

/// Parses one console line. Blank lines yield `Ok(None)`.
pub fn parse_admin_line(line: &str) -> Result<Option<AdminAction>, String> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = parts.collect();
    let verb = verb.to_ascii_uppercase();
    let action = match (verb.as_str(), args.as_slice()) {
        ("DELAY", [id, seconds]) => {
            let seconds: u64 = seconds
                .parse()
                .map_err(|_| format!("Invalid delay duration: {}", seconds))?;
            AdminAction::Command(CommandRequest::delay(*id, seconds))
        }
        ("REROUTE", [id]) => AdminAction::Command(CommandRequest::reroute(*id)),
        ("SHUTDOWN", [id]) => AdminAction::Command(CommandRequest::shutdown(*id)),
        ("START_ROUTE", [id]) => AdminAction::Command(CommandRequest::start_route(*id)),
        ("REGISTRY", []) => AdminAction::Registry,
        ("REPORT", []) => AdminAction::Report,
        ("PLOT", [id]) => AdminAction::Plot(id.to_string()),
        ("EXIT", []) | ("QUIT", []) => AdminAction::Exit,
        _ => return Err(format!("Invalid command: {}\n{}", line.trim(), USAGE)),
    };
    Ok(Some(action))
}

/// Reads admin commands from stdin until EXIT, end of input, or the
/// server stops.
pub async fn run_console(server: &DispatchServer, telemetry_dir: &Path) {
    println!("\nDispatch Server Admin Console");
    println!("{}", USAGE);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = server.run_flag().stopped() => break,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("Error reading console input: {}", e);
                break;
            }
        };
        match parse_admin_line(&line) {
            Ok(None) => {}
            Ok(Some(AdminAction::Exit)) => {
                println!("Exiting console.");
                break;
            }
            Ok(Some(action)) => execute_action(server, telemetry_dir, action),
            Err(message) => println!("{}", message),
        }
    }
}

fn execute_action(server: &DispatchServer, telemetry_dir: &Path, action: AdminAction) {
    match action {
        AdminAction::Command(request) => {
            let status = server.send_command(&request);
            println!("{} -> {}: {}", request.kind, request.vehicle_id, status);
        }
        AdminAction::Registry => {
            let vehicles = server.registry().snapshot();
            if vehicles.is_empty() {
                println!("No vehicles connected.");
            }
            for (id, vehicle_type) in vehicles {
                println!("{:<8} {}", id, vehicle_type);
            }
        }
        AdminAction::Report => match generate_report_summary(telemetry_dir) {
            Ok(summary) => println!("{}", summary),
            Err(e) => eprintln!("Error generating report: {}", e),
        },
        AdminAction::Plot(id) => match plot_vehicle_trace(telemetry_dir, &id) {
            Ok(path) => println!("Trace saved to {}", path.display()),
            Err(e) => eprintln!("Error plotting {}: {}", id, e),
        },
        AdminAction::Exit => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_case_insensitively() {
        assert_eq!(
            parse_admin_line("delay B101 45").unwrap(),
            Some(AdminAction::Command(CommandRequest::delay("B101", 45)))
        );
        assert_eq!(
            parse_admin_line("START_ROUTE S01").unwrap(),
            Some(AdminAction::Command(CommandRequest::start_route("S1")))
        );
        assert_eq!(parse_admin_line("  ").unwrap(), None);
        assert_eq!(parse_admin_line("plot T4").unwrap(), Some(AdminAction::Plot("T4".into())));
        assert_eq!(parse_admin_line("EXIT").unwrap(), Some(AdminAction::Exit));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse_admin_line("DELAY B101 soon").is_err());
        assert!(parse_admin_line("REROUTE").is_err());
        assert!(parse_admin_line("FLY B101").is_err());
    }
}
