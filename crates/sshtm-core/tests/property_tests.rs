//! # Property-Based Tests
//!
//! Invariants of the pure parsing helpers: template rendering, MAC parsing,
//! terminal cleaning and interactive shell transcripts.

use proptest::collection::vec;
use proptest::prelude::*;
use sshtm_core::shell::{self, ECHO_STRING, END, ShellParser};
use sshtm_core::wol::{MAGIC_PACKET_LEN, magic_packet, parse_mac};
use sshtm_core::{Command, Variables};

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Any MAC written with any supported separator parses to the same bytes.
    #[test]
    fn mac_notations_agree(bytes in any::<[u8; 6]>()) {
        let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();

        let colon = hex.join(":");
        let dash = hex.join("-").to_uppercase();
        let bare = hex.concat();

        prop_assert_eq!(parse_mac(&colon).expect("colon"), bytes);
        prop_assert_eq!(parse_mac(&dash).expect("dash"), bytes);
        prop_assert_eq!(parse_mac(&bare).expect("bare"), bytes);
    }

    /// The magic packet is a 0xFF header followed by 16 copies of the MAC.
    #[test]
    fn magic_packet_repeats_mac(bytes in any::<[u8; 6]>()) {
        let packet = magic_packet(&bytes);
        prop_assert_eq!(packet.len(), MAGIC_PACKET_LEN);
        prop_assert!(packet[..6].iter().all(|&b| b == 0xFF));
        for chunk in packet[6..].chunks(6) {
            prop_assert_eq!(chunk, &bytes[..]);
        }
    }

    /// Rendering leaves no placeholder behind when every variable is known.
    #[test]
    fn render_fills_every_placeholder(
        names in vec("[a-z_]{1,8}", 1..5),
        value in "[a-zA-Z0-9 ./-]{0,16}",
    ) {
        let template = names.iter().map(|n| format!("@{{{n}}}")).collect::<Vec<_>>().join(" ");
        let vars: Variables = names.iter().map(|n| (n.clone(), value.clone())).collect();

        let rendered = Command::new(template).render(&vars).expect("render");
        prop_assert!(!rendered.contains("@{"), "rendered output still contains a placeholder");
        prop_assert_eq!(rendered, vec![value; names.len()].join(" "));
    }

    /// Templates without placeholders are returned unchanged.
    #[test]
    fn render_plain_is_identity(text in "[^@]{0,64}") {
        let rendered = Command::new(text.clone()).render(&Variables::new()).expect("render");
        prop_assert_eq!(rendered, text);
    }

    /// Cleaned lines never carry carriage returns, backspaces or escapes.
    #[test]
    fn clean_output_is_plain(raw in vec(any::<u8>(), 0..256)) {
        for line in shell::clean(&raw) {
            prop_assert!(!line.contains('\r'));
            prop_assert!(!line.contains('\u{8}'), "line contains a backspace");
            prop_assert!(!line.contains('\n'));
        }
    }

    /// A well-formed POSIX transcript yields the command output and its code.
    #[test]
    fn transcript_round_trip(
        output in vec("[a-z0-9 ]{1,20}", 0..6),
        code in 0i32..256,
    ) {
        prop_assume!(!output.iter().any(|l| l == "exit"));

        let command = "run-thing";
        let mut lines = vec![format!("$ {command}")];
        lines.extend(output.iter().cloned());
        lines.push(format!("$ {ECHO_STRING}"));
        lines.push(format!("{END}||{code}|%errorlevel%"));
        lines.push("$ exit".to_string());

        let parser = ShellParser::new(vec![command.to_string()]);
        let (stdout, parsed) = parser.parse(lines.join("\r\n").as_bytes());

        prop_assert_eq!(stdout, output);
        prop_assert_eq!(parsed, code);
    }
}
