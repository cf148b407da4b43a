//! Admin entry-list export.
//!
//! Renders the confirmed and pending entries of one event as an A4 PDF, one
//! block per entry with a Code 39 barcode for every present ticket
//! reference. The bars are drawn as vector strokes from the same module
//! sequence the email PNGs use.

use crate::barcode;
use crate::types::{Driver, RaceEntry, RaceEvent};
use printpdf::{BuiltinFont, Color, IndirectFontRef, Line, Mm, PdfDocument, PdfLayerReference,
    Point, Rgb};
use thiserror::Error;

/// Result type alias for export operations.
pub type Result<T> = std::result::Result<T, ExportError>;

/// Export error.
#[derive(Debug, Error)]
pub enum ExportError {
    /// PDF assembly failed.
    #[error("pdf rendering failed: {0}")]
    Pdf(String),

    /// A ticket reference could not be encoded.
    #[error(transparent)]
    Barcode(#[from] barcode::BarcodeError),
}

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 18.0;
const MODULE_WIDTH_MM: f32 = 0.33;
const BARCODE_HEIGHT_MM: f32 = 9.0;
const MM_PER_PT: f32 = 0.352_778;

/// Render the entry list for one event.
///
/// `rows` pairs each entry with its driver when the driver record still
/// exists (synthesised entries may reference drivers created later).
///
/// # Errors
///
/// Returns [`ExportError`] when PDF assembly or barcode encoding fails.
pub fn entries_pdf(event: &RaceEvent, rows: &[(RaceEntry, Option<Driver>)]) -> Result<Vec<u8>> {
    let (doc, page, layer) = PdfDocument::new(
        format!("Entry list: {}", event.name),
        Mm(PAGE_WIDTH_MM),
        Mm(PAGE_HEIGHT_MM),
        "entries",
    );
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| ExportError::Pdf(e.to_string()))?;
    let font_bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| ExportError::Pdf(e.to_string()))?;

    let mut layer = doc.get_page(page).get_layer(layer);
    let mut y = PAGE_HEIGHT_MM - MARGIN_MM;

    layer.use_text(
        format!("{} / {} / {}", event.name, event.venue, event.date),
        14.0,
        Mm(MARGIN_MM),
        Mm(y),
        &font_bold,
    );
    y -= 10.0;

    for (index, (entry, driver)) in rows.iter().enumerate() {
        let block_height = 10.0
            + entry.tickets.present().count() as f32 * (BARCODE_HEIGHT_MM + 9.0);
        if y - block_height < MARGIN_MM {
            let (next_page, next_layer) =
                doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "entries");
            layer = doc.get_page(next_page).get_layer(next_layer);
            y = PAGE_HEIGHT_MM - MARGIN_MM;
        }

        let driver_name = driver.as_ref().map_or_else(
            || format!("(driver {})", entry.driver_id),
            |d| format!("{} {} (#{})", d.first_name, d.last_name, d.race_number),
        );
        layer.use_text(
            format!(
                "{}. {driver_name} / {} / {} / R {}",
                index + 1,
                entry.race_class,
                entry.entry_status,
                entry.amount_paid,
            ),
            10.0,
            Mm(MARGIN_MM),
            Mm(y),
            &font_bold,
        );
        y -= 6.0;

        for (item, reference) in entry.tickets.present() {
            layer.use_text(
                format!("{}: {reference}", item.display_name()),
                8.0,
                Mm(MARGIN_MM + 2.0),
                Mm(y),
                &font,
            );
            y -= BARCODE_HEIGHT_MM + 1.5;
            draw_barcode(&layer, barcode::scan_window(reference), MARGIN_MM + 2.0, y)?;
            y -= 7.5;
        }
        y -= 4.0;
    }

    doc.save_to_bytes().map_err(|e| ExportError::Pdf(e.to_string()))
}

/// Stroke one barcode at `(x, y)`, bars rising `BARCODE_HEIGHT_MM` upward.
fn draw_barcode(layer: &PdfLayerReference, text: &str, x_mm: f32, y_mm: f32) -> Result<()> {
    let modules = barcode::encode(text)?;
    layer.set_outline_color(Color::Rgb(Rgb::new(0.0, 0.0, 0.0, None)));

    let mut index = 0usize;
    while index < modules.len() {
        if !modules[index] {
            index += 1;
            continue;
        }
        let run_start = index;
        while index < modules.len() && modules[index] {
            index += 1;
        }
        let run_len = index - run_start;
        let width_mm = run_len as f32 * MODULE_WIDTH_MM;
        let center_mm = x_mm + run_start as f32 * MODULE_WIDTH_MM + width_mm / 2.0;

        layer.set_outline_thickness(width_mm / MM_PER_PT);
        layer.add_line(Line {
            points: vec![
                (Point::new(Mm(center_mm), Mm(y_mm)), false),
                (
                    Point::new(Mm(center_mm), Mm(y_mm + BARCODE_HEIGHT_MM)),
                    false,
                ),
            ],
            is_closed: false,
        });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{
        DriverId, EntryId, EntryStatus, EventId, Money, PaymentStatus, RentalItem, TicketRefs,
    };
    use chrono::{NaiveDate, Utc};
    use std::collections::HashMap;

    fn event() -> RaceEvent {
        RaceEvent {
            event_id: EventId::from("E-RED"),
            name: "Red Star Raceway".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            venue: "Red Star".to_string(),
            registration_deadline: Utc::now(),
            entry_fee: Money::from_cents(12_500),
            class_fees: HashMap::new(),
            registration_open: true,
        }
    }

    fn entry() -> RaceEntry {
        let mut tickets = TicketRefs::none();
        tickets.set(
            RentalItem::Engine,
            Some("ENG-D001-ERED-1700000000000-A1B2C3".to_string()),
        );
        RaceEntry {
            entry_id: EntryId::from("ENT-1"),
            driver_id: DriverId::from("D-001"),
            event_id: EventId::from("E-RED"),
            race_class: "OK-J".to_string(),
            entry_items: vec![RentalItem::Engine],
            amount_paid: Money::from_cents(14_000),
            payment_reference: "RACE-E-RED-D-001-1700000000000".to_string(),
            pf_payment_id: None,
            payment_status: PaymentStatus::Completed,
            entry_status: EntryStatus::Confirmed,
            tickets,
            team_code: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: Some(Utc::now()),
        }
    }

    #[test]
    fn renders_a_pdf() {
        let rows = vec![(entry(), None)];
        let pdf = entries_pdf(&event(), &rows).unwrap();
        assert_eq!(&pdf[..5], b"%PDF-");
    }

    #[test]
    fn paginates_many_entries() {
        let rows: Vec<_> = (0..60).map(|_| (entry(), None)).collect();
        let pdf = entries_pdf(&event(), &rows).unwrap();
        assert!(pdf.len() > 10_000, "multi-page export should not be tiny");
    }
}
