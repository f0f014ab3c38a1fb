use crate::errors::Error;

#[derive(Debug, Clone, Copy)]
enum Known {
    AlreadyRunning,
    AuthtokenRequired,
}

// Substrings of known ngrok diagnostics. The first match wins.
const KNOWN_OUTPUT: &[(&str, Known)] = &[
    // ngrok v2
    ("is limited to 1 simultaneous ngrok client session", Known::AlreadyRunning),
    // ngrok v3 (ERR_NGROK_108)
    ("simultaneous ngrok agent session", Known::AlreadyRunning),
    ("requires a verified account and authtoken", Known::AuthtokenRequired),
];

// ngrok prints nothing while healthy, so any output is a diagnostic. `output` must not be empty.
pub fn classify(output: &[u8]) -> Error {
    debug_assert!(!output.is_empty(), "classify called with empty output");

    let text = String::from_utf8_lossy(output);
    let known = KNOWN_OUTPUT
        .iter()
        .find(|(pattern, _)| text.contains(pattern))
        .map(|(_, known)| *known);

    match known {
        Some(Known::AlreadyRunning) => Error::AlreadyRunning,
        Some(Known::AuthtokenRequired) => Error::AuthtokenRequired,
        None => Error::UnclassifiedProcessOutput(text.trim_end().to_string()),
    }
}
