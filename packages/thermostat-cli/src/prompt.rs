//! Terminal side of the interactive authorization flow.

use std::io::{self, BufRead, Write};
use thermostat_core::auth::{open_consent_page, AuthorizationPrompt};
use tokio::runtime::RuntimeFlavor;

/// Shows the consent URL on stderr and reads the pasted code from stdin.
///
/// Everything goes to stderr so `--format json` output stays parseable.
pub struct StdinPrompt;

impl AuthorizationPrompt for StdinPrompt {
    fn authorization_code(&self, consent_url: &str) -> io::Result<String> {
        let mut stderr = io::stderr().lock();
        writeln!(stderr)?;
        writeln!(stderr, "Please visit the following URL to authorize:\n\n{}\n", consent_url)?;
        writeln!(
            stderr,
            "After approving access you are redirected to a page whose address contains `code=...`."
        )?;
        write!(stderr, "Paste that address (or just the code) here: ")?;
        stderr.flush()?;

        open_consent_page(consent_url);

        // The user may take minutes; keep other runtime workers free meanwhile.
        let on_worker = tokio::runtime::Handle::try_current()
            .is_ok_and(|h| h.runtime_flavor() == RuntimeFlavor::MultiThread);
        if on_worker {
            tokio::task::block_in_place(|| read_code(io::stdin().lock()))
        } else {
            read_code(io::stdin().lock())
        }
    }
}

fn read_code(mut input: impl BufRead) -> io::Result<String> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stdin closed before an authorization code was entered",
        ));
    }
    Ok(line)
}
