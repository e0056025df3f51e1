//! QR rendering for pairing challenges: SVG for the HTTP endpoints, unicode blocks for the log.

use base64::Engine;
use qrcode::render::{svg, unicode};
use qrcode::types::QrError;
use qrcode::QrCode;

const SVG_MIN_SIZE: u32 = 256;

pub fn render_svg(token: &str) -> Result<String, QrError> {
    let code = QrCode::new(token.as_bytes())?;
    Ok(code
        .render::<svg::Color>()
        .min_dimensions(SVG_MIN_SIZE, SVG_MIN_SIZE)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build())
}

/// SVG wrapped in a `data:` URL, ready for an `<img src>`.
pub fn svg_data_url(token: &str) -> Result<String, QrError> {
    let svg = render_svg(token)?;
    Ok(format!(
        "data:image/svg+xml;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(svg.as_bytes())
    ))
}

/// Compact half-block rendering for terminals.
pub fn render_terminal(token: &str) -> Result<String, QrError> {
    let code = QrCode::new(token.as_bytes())?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}
