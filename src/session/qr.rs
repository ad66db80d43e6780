//! QR artefact rendering: a terminal-safe text block for diagnostics and a
//! base64 PNG data URL for API consumers.

use base64::prelude::{Engine as _, BASE64_STANDARD};
use image::{DynamicImage, ImageFormat};
use qrcode::render::unicode;
use qrcode::QrCode;
use std::io::Cursor;

/// Rendered PNG edge length in pixels.
pub const QR_PNG_SIZE: u32 = 256;

pub struct QrArtifacts {
    /// `data:image/png;base64,...` payload stored on the session row.
    pub data_url: String,
    /// Half-block unicode rendering for the diagnostic log.
    pub terminal: String,
}

pub fn render(payload: &str) -> anyhow::Result<QrArtifacts> {
    let code = QrCode::new(payload.as_bytes())?;
    let terminal = code
        .render::<unicode::Dense1x2>()
        .quiet_zone(true)
        .build();
    let img = code
        .render::<image::Luma<u8>>()
        .min_dimensions(QR_PNG_SIZE, QR_PNG_SIZE)
        .build();
    let mut png = Vec::new();
    DynamicImage::ImageLuma8(img).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(QrArtifacts {
        data_url: format!("data:image/png;base64,{}", BASE64_STANDARD.encode(&png)),
        terminal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_png_data_url() {
        let artifacts = render("2@abcdefghij,klmnopqrst,uvwxyz012345").unwrap();
        let payload = artifacts
            .data_url
            .strip_prefix("data:image/png;base64,")
            .expect("data url prefix");
        let png = BASE64_STANDARD.decode(payload).unwrap();
        assert_eq!(&png[..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
        assert!(!artifacts.terminal.is_empty());
    }

    #[test]
    fn rendering_is_stable_for_same_payload() {
        let a = render("same-payload").unwrap();
        let b = render("same-payload").unwrap();
        assert_eq!(a.data_url, b.data_url);
    }
}
