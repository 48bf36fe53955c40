use std::process::ExitCode;

fn main() -> ExitCode {
    match hgland::cli::run() {
        Ok(code) => code,
        Err(e) => {
            hgland::ui::output::error(format!("{:#}", e));
            ExitCode::from(hgland::cli::commands::EXIT_FAILURE)
        }
    }
}
