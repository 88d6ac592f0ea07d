//! Cherry MX Board 3.0 S lighting control.

use bytes::{BufMut, Bytes, BytesMut};

use crate::controller::{ControlSetup, DeviceIdentity, LightingController};
use crate::error::Error;
use crate::lighting::{Lighting, LightingMode, Rgb};

/// Size of every lighting report.
pub const PAYLOAD_LEN: usize = 64;

/// Brightness byte used by the first firmware protocol revision.
const LEGACY_BRIGHTNESS: u8 = 0x03;

/// Byte layout revision of the lighting report.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub enum PayloadRevision {
    /// Brightness is stored at offset 10.
    #[default]
    Current,

    /// Offset 10 is always `0x03`, ignoring the requested brightness.
    Legacy,
}

/// Source of the opcode byte.
#[derive(Debug, Copy, Clone)]
enum Opcode {
    /// Opcode is offset by the effect speed.
    SpeedOffset(u8),
    Fixed(u8),
}

/// Source of the speed byte.
#[derive(Debug, Copy, Clone)]
enum SpeedByte {
    Speed,
    Fixed(u8),
}

/// Source of the random colors byte.
#[derive(Debug, Copy, Clone)]
enum RandomByte {
    Flag,
    Fixed(u8),
}

/// Source of the RGB bytes.
#[derive(Debug, Copy, Clone)]
enum ColorBytes {
    Lighting,
    Fixed(Rgb),
}

/// Byte template of a single lighting mode.
#[derive(Debug, Copy, Clone)]
struct Template {
    opcode: Opcode,
    selector: u8,
    speed: SpeedByte,
    random: RandomByte,
    color: ColorBytes,
}

impl Template {
    /// Template used by most animated effects.
    const fn animated(base: u8, selector: u8) -> Self {
        Self {
            opcode: Opcode::SpeedOffset(base),
            selector,
            speed: SpeedByte::Speed,
            random: RandomByte::Flag,
            color: ColorBytes::Lighting,
        }
    }
}

/// Look up the template for a mode.
///
/// Scan and Custom have not been decoded from the vendor software yet.
fn template(mode: LightingMode) -> Option<Template> {
    let template = match mode {
        LightingMode::Wave => Template::animated(0x65, 0x00),
        LightingMode::Spectrum => Template::animated(0x66, 0x01),
        LightingMode::Breathing => Template::animated(0x67, 0x02),
        LightingMode::Rolling => Template {
            random: RandomByte::Fixed(0x01),
            color: ColorBytes::Fixed(Rgb::WHITE),
            ..Template::animated(0x6f, 0x0a)
        },
        LightingMode::Curve => Template::animated(0x71, 0x0c),
        LightingMode::Radiation => Template::animated(0x77, 0x12),
        LightingMode::Ripples => Template::animated(0x78, 0x13),
        LightingMode::SingleKey => Template::animated(0x7a, 0x15),
        LightingMode::Static => Template {
            opcode: Opcode::Fixed(0x69),
            selector: 0x03,
            speed: SpeedByte::Fixed(0x02),
            random: RandomByte::Fixed(0x00),
            color: ColorBytes::Lighting,
        },
        LightingMode::Scan | LightingMode::Custom => return None,
    };

    Some(template)
}

pub struct CherryMxBoard3S {
    revision: PayloadRevision,
}

impl CherryMxBoard3S {
    pub fn new(revision: PayloadRevision) -> Self {
        Self { revision }
    }
}

impl LightingController for CherryMxBoard3S {
    fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(0x046a, 0x0079)
    }

    fn control_setup(&self) -> ControlSetup {
        // HID class SET_REPORT, feature report 0x04 on interface 1.
        ControlSetup { request_type: 0x21, request: 0x09, value: 0x0204, index: 0x0001 }
    }

    fn lighting_bytes(&self, lighting: &Lighting) -> Result<Bytes, Error> {
        let template = template(lighting.mode).ok_or(Error::UnsupportedMode(lighting.mode))?;
        Ok(encode(&template, lighting, self.revision))
    }
}

/// Fill a mode template with the lighting parameters.
fn encode(template: &Template, lighting: &Lighting, revision: PayloadRevision) -> Bytes {
    let mut buf = BytesMut::with_capacity(PAYLOAD_LEN);
    let speed = lighting.speed.value();

    // Report ID.
    buf.put_u8(0x04);

    // Opcode.
    buf.put_u8(match template.opcode {
        Opcode::SpeedOffset(base) => base + speed,
        Opcode::Fixed(opcode) => opcode,
    });

    // Fixed header.
    buf.put_slice(&[0x03, 0x06, 0x09, 0x00, 0x00, 0x55, 0x00]);

    // Mode selector.
    buf.put_u8(template.selector);

    // Brightness.
    buf.put_u8(match revision {
        PayloadRevision::Current => lighting.brightness.value(),
        PayloadRevision::Legacy => LEGACY_BRIGHTNESS,
    });

    // Speed.
    buf.put_u8(match template.speed {
        SpeedByte::Speed => speed,
        SpeedByte::Fixed(byte) => byte,
    });

    // Padding.
    buf.put_u8(0x00);

    // Random colors.
    buf.put_u8(match template.random {
        RandomByte::Flag => lighting.random_colors as u8,
        RandomByte::Fixed(byte) => byte,
    });

    // Color.
    let color = match template.color {
        ColorBytes::Lighting => lighting.color,
        ColorBytes::Fixed(color) => color,
    };
    buf.put_u8(color.r);
    buf.put_u8(color.g);
    buf.put_u8(color.b);

    // Padding to the report size.
    buf.resize(PAYLOAD_LEN, 0x00);

    buf.freeze()
}
