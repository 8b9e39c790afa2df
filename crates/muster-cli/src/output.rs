//! Terminal output for the operator console

use tabled::{settings::Style, Table, Tabled};

use muster_host::HostListener;
use muster_protocol::PlayerListing;

/// Format a listing as a table in turn order
pub fn format_listing(listing: &PlayerListing) -> String {
    let Some(match_name) = listing.match_name() else {
        return "No match loaded".to_string();
    };

    #[derive(Tabled)]
    struct SeatRow {
        #[tabled(rename = "SEAT")]
        seat: String,
        #[tabled(rename = "OWNER")]
        owner: String,
        #[tabled(rename = "ENABLED")]
        enabled: String,
        #[tabled(rename = "PLAYED AS")]
        played_as: String,
        #[tabled(rename = "ALLIANCES")]
        alliances: String,
    }

    let rows: Vec<SeatRow> = listing
        .alliances_in_turn_order()
        .iter()
        .map(|entry| {
            let seat = entry.seat.as_str();
            let enabled = if listing.is_enabled(seat) {
                "yes"
            } else if listing.seats_allowed_to_be_disabled().contains(seat) {
                "no"
            } else {
                "no (fixed)"
            };
            SeatRow {
                seat: seat.to_string(),
                owner: listing.owner_of(seat).unwrap_or("-").to_string(),
                enabled: enabled.to_string(),
                played_as: listing
                    .local_player_types()
                    .get(seat)
                    .map(|t| t.as_str().to_string())
                    .unwrap_or_default(),
                alliances: entry.alliances.join(", "),
            }
        })
        .collect();

    let header = format!(
        "{} (round {})",
        match_name,
        listing.match_round().unwrap_or("1")
    );
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    format!("{}\n{}", header, table)
}

/// Print a success message
pub fn print_success(msg: &str) {
    print_marked(false, crossterm::style::Color::Green, "✓ ", msg);
}

/// Print an error message
pub fn print_error(msg: &str) {
    print_marked(true, crossterm::style::Color::Red, "✗ ", msg);
}

/// Print a warning message
pub fn print_warning(msg: &str) {
    print_marked(true, crossterm::style::Color::Yellow, "⚠ ", msg);
}

/// Print an info message
pub fn print_info(msg: &str) {
    print_marked(false, crossterm::style::Color::Cyan, "ℹ ", msg);
}

fn print_marked(to_stderr: bool, color: crossterm::style::Color, mark: &str, msg: &str) {
    use crossterm::style::{Print, ResetColor, SetForegroundColor};

    let line = format!("{}\n", msg);
    if to_stderr {
        let _ = crossterm::execute!(
            std::io::stderr(),
            SetForegroundColor(color),
            Print(mark),
            ResetColor,
            Print(line)
        );
    } else {
        let _ = crossterm::execute!(
            std::io::stdout(),
            SetForegroundColor(color),
            Print(mark),
            ResetColor,
            Print(line)
        );
    }
}

/// Prints every listing the host publishes
pub struct ListingPrinter;

impl HostListener for ListingPrinter {
    fn listing_changed(&self, listing: &PlayerListing) {
        println!("{}", format_listing(listing));
    }

    fn seats_taken_changed(&self) {
        tracing::debug!("Seat ownership changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_protocol::{LocalPlayerType, SeatAlliances};
    use std::collections::{BTreeMap, BTreeSet};

    #[test]
    fn test_empty_listing() {
        assert_eq!(format_listing(&PlayerListing::default()), "No match loaded");
    }

    #[test]
    fn test_listing_table() {
        let owners = BTreeMap::from([
            ("Germany".to_string(), Some("Carl".to_string())),
            ("Russia".to_string(), None),
        ]);
        let enabled = BTreeMap::from([("Germany".to_string(), true), ("Russia".to_string(), false)]);
        let listing = PlayerListing::new(
            owners,
            enabled,
            BTreeMap::from([("Russia".to_string(), LocalPlayerType::WeakAi)]),
            Some("Classic".to_string()),
            Some("3".to_string()),
            BTreeSet::from(["Russia".to_string()]),
            vec![
                SeatAlliances::new("Germany", vec!["Axis".to_string()]),
                SeatAlliances::new("Russia", vec!["Allies".to_string()]),
            ],
        );

        let text = format_listing(&listing);
        assert!(text.starts_with("Classic (round 3)"));
        assert!(text.contains("Germany"));
        assert!(text.contains("weak_ai"));
        assert!(text.contains("Allies"));
    }
}
