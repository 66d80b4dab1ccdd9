//! RSXDUMP2 command-stream demuxer.
//!
//! The file is an 8-byte `RSXDUMP2` tag followed by little-endian records,
//! each introduced by a u32 opcode. Parse failures never reach the renderer
//! core; they surface here as [`DumpError`].

use std::io::{self, Read};
use thiserror::Error;

pub const DUMP_MAGIC: [u8; 8] = *b"RSXDUMP2";

const OP_END: u32 = 0;
const OP_PREPARE_FRAME: u32 = 1;
const OP_FINALIZE_FRAME: u32 = 2;
const OP_TEX_WINDOW: u32 = 3;
const OP_DRAW_OFFSET: u32 = 4;
const OP_DRAW_AREA: u32 = 5;
const OP_DISPLAY_MODE: u32 = 6;
const OP_TRIANGLE: u32 = 7;
const OP_QUAD: u32 = 8;
const OP_LINE: u32 = 9;
const OP_LOAD_IMAGE: u32 = 10;
const OP_FILL_RECT: u32 = 11;
const OP_COPY_RECT: u32 = 12;
const OP_TOGGLE_DISPLAY: u32 = 13;

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("Not an RSXDUMP2 file; tag was {found:02X?}")]
    BadMagic { found: [u8; 8] },
    #[error("Unknown opcode {opcode}")]
    UnknownOpcode { opcode: u32 },
    #[error("Image payload {width}x{height} exceeds VRAM dimensions")]
    OversizedImage { width: u32, height: u32 },
    #[error("I/O error reading dump: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CommandVertex {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub color: u32,
    pub u: u16,
    pub v: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandRenderState {
    pub texpage_x: u32,
    pub texpage_y: u32,
    pub clut_x: u32,
    pub clut_y: u32,
    pub texture_blend_mode: u32,
    pub depth_shift: u32,
    pub dither: bool,
    pub blend_mode: u32,
    pub mask_test: bool,
    pub set_mask: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandLine {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
    pub c0: u32,
    pub c1: u32,
    pub dither: bool,
    pub blend_mode: u32,
    pub mask_test: bool,
    pub set_mask: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    End,
    PrepareFrame,
    FinalizeFrame,
    TexWindow { tww: u32, twh: u32, twx: u32, twy: u32 },
    DrawOffset { x: i32, y: i32 },
    DrawArea { x0: u32, y0: u32, x1: u32, y1: u32 },
    DisplayMode { x: u32, y: u32, width: u32, height: u32, depth_24bpp: bool },
    Triangle { vertices: [CommandVertex; 3], state: CommandRenderState },
    Quad { vertices: [CommandVertex; 4], state: CommandRenderState },
    Line(CommandLine),
    LoadImage {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        force_mask_bit: bool,
        check_mask_bit: bool,
        data: Vec<u16>,
    },
    FillRect { color: u32, x: u32, y: u32, width: u32, height: u32 },
    CopyRect {
        src_x: u32,
        src_y: u32,
        dst_x: u32,
        dst_y: u32,
        width: u32,
        height: u32,
        force_mask_bit: bool,
        check_mask_bit: bool,
    },
    ToggleDisplay { enabled: bool },
}

pub struct DumpReader<R: Read> {
    reader: R,
}

impl<R: Read> DumpReader<R> {
    /// Validates the tag and positions the reader at the first record.
    pub fn new(mut reader: R) -> Result<Self, DumpError> {
        let mut tag = [0; 8];
        reader.read_exact(&mut tag)?;
        if tag != DUMP_MAGIC {
            return Err(DumpError::BadMagic { found: tag });
        }

        Ok(Self { reader })
    }

    pub fn next_command(&mut self) -> Result<Command, DumpError> {
        let opcode = self.read_u32()?;

        match opcode {
            OP_END => Ok(Command::End),
            OP_PREPARE_FRAME => Ok(Command::PrepareFrame),
            OP_FINALIZE_FRAME => Ok(Command::FinalizeFrame),
            OP_TEX_WINDOW => {
                let tww = self.read_u32()?;
                let twh = self.read_u32()?;
                let twx = self.read_u32()?;
                let twy = self.read_u32()?;
                Ok(Command::TexWindow { tww, twh, twx, twy })
            }
            OP_DRAW_OFFSET => {
                let x = self.read_i32()?;
                let y = self.read_i32()?;
                Ok(Command::DrawOffset { x, y })
            }
            OP_DRAW_AREA => {
                let x0 = self.read_u32()?;
                let y0 = self.read_u32()?;
                let x1 = self.read_u32()?;
                let y1 = self.read_u32()?;
                Ok(Command::DrawArea { x0, y0, x1, y1 })
            }
            OP_DISPLAY_MODE => {
                let x = self.read_u32()?;
                let y = self.read_u32()?;
                let width = self.read_u32()?;
                let height = self.read_u32()?;
                let depth_24bpp = self.read_bool()?;
                Ok(Command::DisplayMode { x, y, width, height, depth_24bpp })
            }
            OP_TRIANGLE => {
                let vertices = [self.read_vertex()?, self.read_vertex()?, self.read_vertex()?];
                let state = self.read_state()?;
                Ok(Command::Triangle { vertices, state })
            }
            OP_QUAD => {
                let vertices = [
                    self.read_vertex()?,
                    self.read_vertex()?,
                    self.read_vertex()?,
                    self.read_vertex()?,
                ];
                let state = self.read_state()?;
                Ok(Command::Quad { vertices, state })
            }
            OP_LINE => {
                let x0 = self.read_i32()?;
                let y0 = self.read_i32()?;
                let x1 = self.read_i32()?;
                let y1 = self.read_i32()?;
                let c0 = self.read_u32()?;
                let c1 = self.read_u32()?;
                let dither = self.read_bool()?;
                let blend_mode = self.read_u32()?;
                let mask_test = self.read_bool()?;
                let set_mask = self.read_bool()?;
                Ok(Command::Line(CommandLine {
                    x0,
                    y0,
                    x1,
                    y1,
                    c0,
                    c1,
                    dither,
                    blend_mode,
                    mask_test,
                    set_mask,
                }))
            }
            OP_LOAD_IMAGE => {
                let x = self.read_u32()?;
                let y = self.read_u32()?;
                let width = self.read_u32()?;
                let height = self.read_u32()?;
                let force_mask_bit = self.read_bool()?;
                let check_mask_bit = self.read_bool()?;

                if width > 1024 || height > 512 {
                    return Err(DumpError::OversizedImage { width, height });
                }

                let mut data = vec![0; (width * height) as usize];
                let mut bytes = vec![0; data.len() * 2];
                self.reader.read_exact(&mut bytes)?;
                for (texel, chunk) in data.iter_mut().zip(bytes.chunks_exact(2)) {
                    *texel = u16::from_le_bytes([chunk[0], chunk[1]]);
                }

                Ok(Command::LoadImage { x, y, width, height, force_mask_bit, check_mask_bit, data })
            }
            OP_FILL_RECT => {
                let color = self.read_u32()?;
                let x = self.read_u32()?;
                let y = self.read_u32()?;
                let width = self.read_u32()?;
                let height = self.read_u32()?;
                Ok(Command::FillRect { color, x, y, width, height })
            }
            OP_COPY_RECT => {
                let src_x = self.read_u32()?;
                let src_y = self.read_u32()?;
                let dst_x = self.read_u32()?;
                let dst_y = self.read_u32()?;
                let width = self.read_u32()?;
                let height = self.read_u32()?;
                let force_mask_bit = self.read_bool()?;
                let check_mask_bit = self.read_bool()?;
                Ok(Command::CopyRect {
                    src_x,
                    src_y,
                    dst_x,
                    dst_y,
                    width,
                    height,
                    force_mask_bit,
                    check_mask_bit,
                })
            }
            OP_TOGGLE_DISPLAY => {
                let enabled = self.read_bool()?;
                Ok(Command::ToggleDisplay { enabled })
            }
            opcode => Err(DumpError::UnknownOpcode { opcode }),
        }
    }

    fn read_u32(&mut self) -> Result<u32, DumpError> {
        let mut bytes = [0; 4];
        self.reader.read_exact(&mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_i32(&mut self) -> Result<i32, DumpError> {
        let mut bytes = [0; 4];
        self.reader.read_exact(&mut bytes)?;
        Ok(i32::from_le_bytes(bytes))
    }

    fn read_f32(&mut self) -> Result<f32, DumpError> {
        let mut bytes = [0; 4];
        self.reader.read_exact(&mut bytes)?;
        Ok(f32::from_le_bytes(bytes))
    }

    fn read_bool(&mut self) -> Result<bool, DumpError> {
        Ok(self.read_u32()? != 0)
    }

    fn read_vertex(&mut self) -> Result<CommandVertex, DumpError> {
        let x = self.read_f32()?;
        let y = self.read_f32()?;
        let w = self.read_f32()?;
        let color = self.read_u32()?;
        let u = self.read_u32()? as u16;
        let v = self.read_u32()? as u16;
        Ok(CommandVertex { x, y, w, color, u, v })
    }

    fn read_state(&mut self) -> Result<CommandRenderState, DumpError> {
        let texpage_x = self.read_u32()?;
        let texpage_y = self.read_u32()?;
        let clut_x = self.read_u32()?;
        let clut_y = self.read_u32()?;
        let texture_blend_mode = self.read_u32()?;
        let depth_shift = self.read_u32()?;
        let dither = self.read_bool()?;
        let blend_mode = self.read_u32()?;
        let mask_test = self.read_bool()?;
        let set_mask = self.read_bool()?;
        Ok(CommandRenderState {
            texpage_x,
            texpage_y,
            clut_x,
            clut_y,
            texture_blend_mode,
            depth_shift,
            dither,
            blend_mode,
            mask_test,
            set_mask,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct StreamBuilder(Vec<u8>);

    impl StreamBuilder {
        fn new() -> Self {
            Self(DUMP_MAGIC.to_vec())
        }

        fn u32(mut self, value: u32) -> Self {
            self.0.extend_from_slice(&value.to_le_bytes());
            self
        }

        fn i32(self, value: i32) -> Self {
            self.u32(value as u32)
        }

        fn f32(mut self, value: f32) -> Self {
            self.0.extend_from_slice(&value.to_le_bytes());
            self
        }

        fn u16s(mut self, values: &[u16]) -> Self {
            for value in values {
                self.0.extend_from_slice(&value.to_le_bytes());
            }
            self
        }

        fn vertex(self, x: f32, y: f32, color: u32) -> Self {
            self.f32(x).f32(y).f32(1.0).u32(color).u32(0).u32(0)
        }

        fn state(self) -> Self {
            self.u32(0).u32(0).u32(0).u32(0).u32(0).u32(0).u32(0).u32(u32::MAX).u32(0).u32(0)
        }

        fn reader(self) -> DumpReader<Cursor<Vec<u8>>> {
            DumpReader::new(Cursor::new(self.0)).expect("valid tag")
        }
    }

    #[test]
    fn rejects_bad_magic() {
        let result = DumpReader::new(Cursor::new(b"RSXDUMP1".to_vec()));
        assert!(matches!(result, Err(DumpError::BadMagic { .. })));
    }

    #[test]
    fn parses_frame_bracketing() {
        let mut reader =
            StreamBuilder::new().u32(OP_PREPARE_FRAME).u32(OP_FINALIZE_FRAME).u32(OP_END).reader();

        assert_eq!(reader.next_command().unwrap(), Command::PrepareFrame);
        assert_eq!(reader.next_command().unwrap(), Command::FinalizeFrame);
        assert_eq!(reader.next_command().unwrap(), Command::End);
    }

    #[test]
    fn parses_triangle_record() {
        let mut reader = StreamBuilder::new()
            .u32(OP_TRIANGLE)
            .vertex(0.0, 0.0, 0xFF_FFFF)
            .vertex(320.0, 0.0, 0xFF_FFFF)
            .vertex(0.0, 240.0, 0xFF_FFFF)
            .state()
            .reader();

        let Command::Triangle { vertices, state } = reader.next_command().unwrap() else {
            panic!("expected triangle");
        };
        assert_eq!(vertices[1].x, 320.0);
        assert_eq!(vertices[2].y, 240.0);
        assert_eq!(state.blend_mode, u32::MAX);
        assert!(!state.mask_test);
    }

    #[test]
    fn parses_draw_area_and_offset() {
        let mut reader = StreamBuilder::new()
            .u32(OP_DRAW_AREA)
            .u32(0)
            .u32(0)
            .u32(319)
            .u32(239)
            .u32(OP_DRAW_OFFSET)
            .i32(-16)
            .i32(8)
            .reader();

        assert_eq!(
            reader.next_command().unwrap(),
            Command::DrawArea { x0: 0, y0: 0, x1: 319, y1: 239 }
        );
        assert_eq!(reader.next_command().unwrap(), Command::DrawOffset { x: -16, y: 8 });
    }

    #[test]
    fn parses_load_image_payload() {
        let texels = [0x8000, 0x001F, 0x03E0, 0x7C00];
        let mut reader = StreamBuilder::new()
            .u32(OP_LOAD_IMAGE)
            .u32(64)
            .u32(32)
            .u32(2)
            .u32(2)
            .u32(1)
            .u32(0)
            .u16s(&texels)
            .reader();

        let Command::LoadImage { x, y, width, height, force_mask_bit, check_mask_bit, data } =
            reader.next_command().unwrap()
        else {
            panic!("expected load image");
        };
        assert_eq!((x, y, width, height), (64, 32, 2, 2));
        assert!(force_mask_bit);
        assert!(!check_mask_bit);
        assert_eq!(data, texels);
    }

    #[test]
    fn rejects_oversized_image() {
        let mut reader = StreamBuilder::new()
            .u32(OP_LOAD_IMAGE)
            .u32(0)
            .u32(0)
            .u32(2048)
            .u32(2)
            .u32(0)
            .u32(0)
            .reader();

        assert!(matches!(
            reader.next_command(),
            Err(DumpError::OversizedImage { width: 2048, .. })
        ));
    }

    #[test]
    fn truncated_record_is_an_io_error() {
        let mut reader = StreamBuilder::new().u32(OP_DRAW_AREA).u32(0).reader();

        assert!(matches!(reader.next_command(), Err(DumpError::Io(_))));
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let mut reader = StreamBuilder::new().u32(99).reader();

        assert!(matches!(
            reader.next_command(),
            Err(DumpError::UnknownOpcode { opcode: 99 })
        ));
    }
}
