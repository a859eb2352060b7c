//! `broker --install-service` / `--uninstall-service`.
//!
//! Printing the unit text and install command rather than writing and
//! enabling the unit ourselves keeps this command free of root/systemctl
//! side effects; the operator copies and runs it deliberately.

use anyhow::Result;

const UNIT_NAME: &str = "agent-broker.service";

pub fn execute_install() -> Result<()> {
    let exe = std::env::current_exe()
        .ok()
        .and_then(|p| p.to_str().map(str::to_string))
        .unwrap_or_else(|| "brokerd".to_string());

    println!("# Save as ~/.config/systemd/user/{UNIT_NAME}");
    println!("[Unit]");
    println!("Description=Local agent broker daemon");
    println!("After=network.target");
    println!();
    println!("[Service]");
    println!("ExecStart={exe}");
    println!("Restart=on-failure");
    println!("RestartSec=2");
    println!();
    println!("[Install]");
    println!("WantedBy=default.target");
    println!();
    println!("# Then install and enable it with:");
    println!("mkdir -p ~/.config/systemd/user && cp {UNIT_NAME} ~/.config/systemd/user/ && \\");
    println!("  systemctl --user daemon-reload && systemctl --user enable --now {UNIT_NAME}");
    Ok(())
}

pub fn execute_uninstall() -> Result<()> {
    println!("# Stop and remove a previously installed unit with:");
    println!("systemctl --user disable --now {UNIT_NAME}");
    println!("rm ~/.config/systemd/user/{UNIT_NAME}");
    println!("systemctl --user daemon-reload");
    Ok(())
}
