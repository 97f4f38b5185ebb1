//! Test doubles shared by the engine's unit tests.

use std::sync::Mutex;

use anyhow::{bail, Result};
use image::{Rgba, RgbaImage};
use vignette_contracts::images::ImageRef;
use vignette_contracts::providers::NamedProvider;

use crate::backend::{
    EditOptions, GenerativeBackend, ImageRequestOptions, OutputKind, ReplyPart,
};
use crate::sprites::encode_png;

pub(crate) fn png(px: u32, [r, g, b]: [u8; 3]) -> ImageRef {
    encode_png(&RgbaImage::from_pixel(px, px, Rgba([r, g, b, 255])))
        .unwrap_or_else(|err| panic!("png fixture: {err}"))
}

/// Square 4x4 sheet where every tile has its own colour.
pub(crate) fn sheet_png(px: u32) -> ImageRef {
    let tile = (px / 4).max(1);
    let sheet = RgbaImage::from_fn(px, px, |x, y| {
        let frame = (y / tile) * 4 + x / tile;
        Rgba([(frame * 16) as u8, 64, 128, 255])
    });
    encode_png(&sheet).unwrap_or_else(|err| panic!("sheet fixture: {err}"))
}

/// Backend answering from canned values and recording every call as
/// `<capability>:<prompt>`.
pub(crate) struct ScriptedBackend {
    text: String,
    images: Vec<ImageRef>,
    edit_reply: Option<Vec<ReplyPart>>,
    failure: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self {
            text: "A calm head-and-shoulders portrait.".to_string(),
            images: vec![png(8, [40, 80, 120])],
            edit_reply: None,
            failure: None,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedBackend {
    pub(crate) fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub(crate) fn with_no_images(mut self) -> Self {
        self.images.clear();
        self
    }

    pub(crate) fn with_edit_reply(mut self, parts: Vec<ReplyPart>) -> Self {
        self.edit_reply = Some(parts);
        self
    }

    pub(crate) fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn record(&self, call: String) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        if let Some(message) = self.failure.as_deref() {
            bail!("scripted failure: {message}");
        }
        Ok(())
    }
}

impl NamedProvider for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }
}

impl GenerativeBackend for ScriptedBackend {
    fn compose_text(&self, prompt: &str) -> Result<String> {
        self.record(format!("text:{prompt}"))?;
        Ok(self.text.clone())
    }

    fn generate_image(
        &self,
        prompt: &str,
        _options: &ImageRequestOptions,
    ) -> Result<Vec<ImageRef>> {
        self.record(format!("image:{prompt}"))?;
        Ok(self.images.clone())
    }

    fn edit_image(
        &self,
        _image: &ImageRef,
        instruction: &str,
        options: &EditOptions,
    ) -> Result<Vec<ReplyPart>> {
        let tag = match options.output {
            OutputKind::ImageOnly => "image",
            OutputKind::ImageWithText => "image+text",
        };
        self.record(format!("edit[{tag}]:{instruction}"))?;
        Ok(self
            .edit_reply
            .clone()
            .unwrap_or_else(|| vec![ReplyPart::Image(png(8, [200, 100, 50]))]))
    }
}
