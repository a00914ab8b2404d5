//! A `Printer` that shells out to an external print program.
//!
//! The program gets the configured arguments followed by the image path.
//! Copies and the run note are passed in `LABELVAL_PRINT_COPIES` and
//! `LABELVAL_PRINT_NOTE`.

use std::process::Stdio;

use tokio::process::Command;

use labelval_core::{CoreError, Printer, SourceImage};

#[derive(Debug, Clone)]
pub struct CommandPrinter {
    program: String,
    args: Vec<String>,
}

impl CommandPrinter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl Printer for CommandPrinter {
    async fn print(&self, image: &SourceImage, copies: u32, note: &str) -> Result<(), CoreError> {
        tracing::debug!(program = %self.program, image = %image.path.display(), copies, "printing");

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&image.path)
            .env("LABELVAL_PRINT_COPIES", copies.to_string())
            .env("LABELVAL_PRINT_NOTE", note)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CoreError::Printer {
                message: format!("could not start {}: {e}", self.program),
            })?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(CoreError::Printer {
            message: format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            ),
        })
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn image() -> SourceImage {
        SourceImage {
            uid: "img-1".into(),
            path: "label.png".into(),
        }
    }

    #[tokio::test]
    async fn successful_program_prints() {
        let printer = CommandPrinter::new("true", Vec::new());
        printer.print(&image(), 1, "Loop 1 : 1").await.unwrap();
    }

    #[tokio::test]
    async fn failing_program_reports_stderr() {
        let printer = CommandPrinter::new(
            "sh",
            vec!["-c".into(), "echo offline >&2; exit 3".into(), "print".into()],
        );
        let err = printer.print(&image(), 1, "Loop 1 : 1").await.unwrap_err();
        match err {
            CoreError::Printer { message } => assert!(message.contains("offline")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn note_reaches_the_program() {
        let printer = CommandPrinter::new(
            "sh",
            vec![
                "-c".into(),
                r#"test "$LABELVAL_PRINT_NOTE" = "Loop 2 : 5""#.into(),
                "print".into(),
            ],
        );
        printer.print(&image(), 1, "Loop 2 : 5").await.unwrap();
    }

    #[tokio::test]
    async fn missing_program_is_a_printer_error() {
        let printer = CommandPrinter::new("/nonexistent/labelval-print", Vec::new());
        assert!(matches!(
            printer.print(&image(), 1, "").await,
            Err(CoreError::Printer { .. })
        ));
    }
}
