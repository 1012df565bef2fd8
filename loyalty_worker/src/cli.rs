use std::{env, env::VarError};

/// The worker takes no arguments. Any argument prints the help text and the current configuration.
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    const DISPLAY_ENVS: [&str; 14] = [
        "RUST_LOG",
        "LOYALTY_DATABASE_URL",
        "LOYALTY_DB_MAX_CONNECTIONS",
        "LOYALTY_EXPIRATION_INTERVAL_HOURS",
        "LOYALTY_RETENTION_INTERVAL_HOURS",
        "LOYALTY_BALANCE_REPAIR_INTERVAL_HOURS",
        "LOYALTY_RETENTION_MODE",
        "LOYALTY_RETENTION_WINDOW_DAYS",
        "LOYALTY_REFERRAL_MONTHLY_CAP",
        "LOYALTY_REFERRAL_COOLDOWN_HOURS",
        "LOYALTY_REDEMPTION_CODE_TTL_DAYS",
        "LOYALTY_REDEMPTION_CODE_ATTEMPTS",
        "LOYALTY_BALANCE_BATCH_SIZE",
        "LOYALTY_EMIT_RULE_TRACE",
    ];

    println!("Current environment values:");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<40} {val:<15}");
    })
}
