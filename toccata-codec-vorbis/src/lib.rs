// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The custom-Vorbis container layer.
//!
//! Many engines ship Vorbis with the Ogg layer replaced or the packets trimmed: Wwise, FMOD
//! FSB, OGL, SK, VID1, Rockstar AWC and OOR each frame (and sometimes mangle) packets their
//! own way. This crate reconstructs bit-accurate standard Vorbis — the synthetic
//! identification/comment headers, the rebuilt setup, and the audio packets — and feeds them
//! to `lewton` for PCM. Containers construct a [`VorbisStream`] with their parsed parameters;
//! standalone `.oor` files also register a probe descriptor.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// The following lints are allowed in all Toccata crates. Please see the workspace Cargo.toml for
// their justification.
#![allow(clippy::identity_op)]
#![allow(clippy::manual_range_contains)]

use lewton::audio::PreviousWindowRight;
use lewton::header::{IdentHeader, SetupHeader};
use log::debug;

use toccata_core::audio::{AudioStream, LoopPoints, StreamInfo};
use toccata_core::errors::{decode_error, seek_error, Result, SeekErrorKind};
use toccata_core::formats::{read_magic, CompanionRole, FormatDescriptor, OpenOptions};
use toccata_core::io::{BitReaderLtr, ByteSource};

pub mod awc;
pub mod codebooks;
pub mod common;
pub mod fsb;
pub mod ogg;
pub mod ogl;
pub mod oor;
pub mod packed_codebooks;
pub mod vid1;
pub mod wwise;

pub use wwise::{WwiseConfig, WwiseVersion};

use codebooks::CodebookLibrary;
use ogg::PageWalker;
use oor::OorPacketReader;
use wwise::WwiseVorbis;

/// Container-provided stream parameters.
#[derive(Clone, Copy, Debug, Default)]
pub struct VorbisConfig {
    pub channels: u8,
    pub sample_rate: u32,
    /// Long/short blocksize exponents, for variants whose headers are synthesized.
    pub blocksize_0_exp: u8,
    pub blocksize_1_exp: u8,
    /// Offset of the header packets (meaning varies per variant).
    pub setup_offset: u64,
    /// Offset of the first audio packet, for variants that separate the two.
    pub data_offset: u64,
    pub num_frames: u64,
    pub loops: Option<LoopPoints>,
}

/// Which custom framing the stream uses.
pub enum VorbisVariant {
    /// 16-bit packet sizes, setup referenced by id from the built-in table (or a companion
    /// library).
    Fsb { setup_id: u32 },
    /// The Wwise family.
    Wwise(WwiseConfig),
    /// 16-bit `(size << 2) | flags` packet headers, plain header triad.
    Ogl,
    /// Ogg pages with swapped magic and a shortened header identifier.
    Sk,
    /// FRAM/AUDD blocks with variable-length packet sizes.
    Vid1,
    /// 32-bit header / 16-bit audio packet sizes in 0x800-aligned chunks.
    Awc,
    /// OOR bit-packed pages.
    Oor,
    /// Plain Ogg pages (restored by a container's deblocker).
    Ogg,
}

/// Per-variant packet-walk state.
enum PacketState {
    Fsb { offset: u64 },
    Ogl { offset: u64 },
    Awc { offset: u64, data_start: u64 },
    Vid1 { offset: u64, blocks: vid1::Vid1Blocks },
    Pages(PageWalker),
    Wwise(Box<WwiseVorbis>),
    Oor(OorPacketReader),
}

/// The registry descriptor for standalone `.oor` files.
pub const OOR_DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "oor",
    description: "OOR Vorbis",
    score: score_oor,
    open: |src, opts| Ok(Box::new(open_oor(src, opts)?)),
};

fn score_oor(src: &mut dyn ByteSource) -> Result<u8> {
    // An OOR stream starts with a v0/v1 BOS page plus a valid bit-packed header.
    let head = read_magic::<0x20>(src)?;
    let mut bs = BitReaderLtr::new(&head);
    let mut page = oor::OorPage::default();
    oor::read_page(&mut bs, &mut page);
    let mut hdr = oor::OorHeader::default();
    oor::read_header(&mut bs, &mut hdr);
    Ok(if oor::validate_header_page(&page, &hdr) { 150 } else { 0 })
}

/// Opens a standalone OOR stream: header page, setup page, then audio pages.
fn open_oor(mut src: Box<dyn ByteSource>, opts: &OpenOptions) -> Result<VorbisStream> {
    if opts.subsong() != 1 {
        return decode_error("vorbis: subsong out of range");
    }

    let mut head = vec![0u8; 0x40.min(src.byte_len() as usize)];
    src.read_exact_at(0, &mut head)?;

    let mut bs = BitReaderLtr::new(&head);
    let mut page = oor::OorPage::default();
    oor::read_page(&mut bs, &mut page);
    let mut hdr = oor::OorHeader::default();
    oor::read_header(&mut bs, &mut hdr);
    if !oor::validate_header_page(&page, &hdr) {
        return decode_error("vorbis: invalid oor header page");
    }
    let setup_offset = (bs.pos() / 8) as u64;

    let cfg = VorbisConfig {
        channels: hdr.channels as u8,
        sample_rate: hdr.sample_rate,
        blocksize_0_exp: hdr.blocksize0_exp,
        blocksize_1_exp: hdr.blocksize1_exp,
        setup_offset,
        data_offset: 0, /* derived from the setup page below */
        num_frames: hdr.last_granule,
        loops: None,
    };

    VorbisStream::try_new(src, VorbisVariant::Oor, cfg, opts)
}

/// A stream of reconstructed Vorbis packets decoded to PCM.
pub struct VorbisStream {
    src: Box<dyn ByteSource>,
    info: StreamInfo,

    ident: IdentHeader,
    setup: SetupHeader,
    pwr: PreviousWindowRight,
    state: PacketState,
    /// Offset of the first audio packet, for restarts.
    audio_start: u64,

    sample_buffer: Vec<i16>,
    buffered: usize,
    consumed: usize,
    to_discard: u64,
    emitted: u64,
    poisoned: bool,
}

impl VorbisStream {
    /// Builds the three standard header packets and the packet-walk state for a variant.
    #[allow(clippy::type_complexity)]
    fn make_headers(
        variant: VorbisVariant,
        cfg: &VorbisConfig,
        src: &mut dyn ByteSource,
        opts: &OpenOptions,
    ) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>, PacketState, u64)> {
        match variant {
            VorbisVariant::Fsb { setup_id } => {
                /* FSB defaults to 2048/256 blocksizes */
                let ident = common::build_header_identification(
                    cfg.channels,
                    cfg.sample_rate,
                    common::blocksize_exp(2048),
                    common::blocksize_exp(256),
                );
                let comment = common::build_header_comment();

                /* the built-in setup table answers first, a companion library fills its
                 * gaps */
                let setup = match packed_codebooks::fsb_setup(setup_id) {
                    Some(blob) => blob.to_vec(),
                    None => {
                        let mut companion = opts.companion(CompanionRole::Codebooks)?;
                        codebooks::load_fsb_setup(companion.as_mut(), setup_id)?
                    }
                };

                Ok((ident, comment, setup, PacketState::Fsb { offset: cfg.data_offset }, cfg.data_offset))
            }

            VorbisVariant::Wwise(ww_cfg) => {
                let library = match opts.companion_opt(CompanionRole::Codebooks)? {
                    Some(companion) => CodebookLibrary::new(companion),
                    None => CodebookLibrary::empty(),
                };
                let mut wwise = WwiseVorbis::new(ww_cfg);
                let (ident, comment, setup) = wwise.make_headers(src, &library)?;
                Ok((ident, comment, setup, PacketState::Wwise(Box::new(wwise)), ww_cfg.audio_offset))
            }

            VorbisVariant::Ogl => {
                let mut offset = cfg.setup_offset;
                let mut triad = Vec::new();
                for _ in 0..3 {
                    match ogl::next_packet(src, &mut offset)? {
                        Some(packet) => triad.push(packet),
                        None => return decode_error("vorbis: truncated ogl header triad"),
                    }
                }
                let setup = triad.pop().unwrap();
                let comment = triad.pop().unwrap();
                let ident = triad.pop().unwrap();
                Ok((ident, comment, setup, PacketState::Ogl { offset }, offset))
            }

            VorbisVariant::Sk => {
                let walker = PageWalker::with_magic(cfg.setup_offset, *b"\x11SK\x10");

                /* first page: the id packet; second page: comment + setup */
                let first = walker.page_info(src, cfg.setup_offset, Some(0))?;
                if first.page_packets != 1 {
                    return decode_error("vorbis: unexpected sk id page layout");
                }
                let second_page = first.page_end;
                let comment_info = walker.page_info(src, second_page, Some(0))?;
                let setup_info = walker.page_info(src, second_page, Some(1))?;
                if comment_info.page_packets != 2 {
                    return decode_error("vorbis: unexpected sk setup page layout");
                }

                let ident =
                    walker.rebuild_header(src, first.packet_offset, first.packet_size, 2)?;
                let comment = walker.rebuild_header(
                    src,
                    comment_info.packet_offset,
                    comment_info.packet_size,
                    2,
                )?;
                let setup =
                    walker.rebuild_header(src, setup_info.packet_offset, setup_info.packet_size, 2)?;

                let mut audio = PageWalker::with_magic(0, *b"\x11SK\x10");
                audio.seek_page(comment_info.page_end);
                Ok((ident, comment, setup, PacketState::Pages(audio), comment_info.page_end))
            }

            VorbisVariant::Vid1 => {
                let mut offset = cfg.setup_offset;
                let mut blocks = vid1::Vid1Blocks::default();

                let ident = match vid1::next_packet(src, &mut offset, &mut blocks)? {
                    Some(packet) => packet,
                    None => return decode_error("vorbis: missing vid1 id packet"),
                };
                let comment = common::build_header_comment();
                let setup = match vid1::next_packet(src, &mut offset, &mut blocks)? {
                    Some(packet) => packet,
                    None => return decode_error("vorbis: missing vid1 setup packet"),
                };

                let offset = if cfg.data_offset != 0 { cfg.data_offset } else { offset };
                Ok((ident, comment, setup, PacketState::Vid1 { offset, blocks }, offset))
            }

            VorbisVariant::Awc => {
                let mut offset = cfg.setup_offset;
                let ident = awc::header_packet(src, &mut offset)?;
                let comment = awc::header_packet(src, &mut offset)?;
                let setup = awc::header_packet(src, &mut offset)?;

                Ok((
                    ident,
                    comment,
                    setup,
                    PacketState::Awc { offset: cfg.data_offset, data_start: cfg.data_offset },
                    cfg.data_offset,
                ))
            }

            VorbisVariant::Oor => {
                let ident = common::build_header_identification(
                    cfg.channels,
                    cfg.sample_rate,
                    cfg.blocksize_0_exp,
                    cfg.blocksize_1_exp,
                );
                let comment = common::build_header_comment();

                /* the setup page holds a 1-byte selector packet plus the codebook blob */
                let avail = src.byte_len().saturating_sub(cfg.setup_offset) as usize;
                let mut head = vec![0u8; 0x400.min(avail)];
                src.read_exact_at(cfg.setup_offset, &mut head)?;
                let mut bs = BitReaderLtr::new(&head);

                let mut page = oor::OorPage::default();
                oor::read_page(&mut bs, &mut page);
                let mut sizes = oor::OorSizes::default();
                oor::read_sizes(&mut bs, &mut sizes);

                let dummy_hdr = oor::OorHeader {
                    version: page.version,
                    ..Default::default()
                };
                if !oor::validate_setup_page(&page, &sizes, &dummy_hdr) {
                    return decode_error("vorbis: invalid oor setup page");
                }

                let selector_offset = cfg.setup_offset + (bs.pos() / 8) as u64;
                let mut selector = [0u8; 1];
                src.read_exact_at(selector_offset, &mut selector)?;
                let setup_info = oor::read_setup(&mut BitReaderLtr::new(&selector));
                if !oor::validate_setup_info(&sizes, &setup_info) {
                    return decode_error("vorbis: invalid oor setup info");
                }

                let blob_size =
                    (sizes.base_packet_size + sizes.variable_packet_size[1]) as usize;
                let setup = if setup_info.codebook_id > 0 {
                    /* known-codebook reference: the built-in set answers first, a companion
                     * library fills its gaps */
                    match packed_codebooks::OOR_CODEBOOKS.get(setup_info.codebook_id) {
                        Some(blob) => blob.to_vec(),
                        None => {
                            let companion = opts.companion(CompanionRole::Codebooks)?;
                            CodebookLibrary::new(companion).load(setup_info.codebook_id)?
                        }
                    }
                }
                else {
                    let mut blob = vec![0u8; blob_size];
                    src.read_exact_at(selector_offset + 1, &mut blob)?;
                    blob
                };

                let data_offset = selector_offset + 1 + blob_size as u64;
                let header = oor::OorHeader {
                    version: page.version,
                    ..Default::default()
                };
                Ok((
                    ident,
                    comment,
                    setup,
                    PacketState::Oor(OorPacketReader::new(data_offset, header)),
                    data_offset,
                ))
            }

            VorbisVariant::Ogg => {
                let walker = PageWalker::new(cfg.setup_offset);

                let first = walker.page_info(src, cfg.setup_offset, Some(0))?;
                let second_page = first.page_end;
                let comment_info = walker.page_info(src, second_page, Some(0))?;
                let setup_info = walker.page_info(src, second_page, Some(1))?;

                let mut ident = vec![0u8; first.packet_size];
                src.read_exact_at(first.packet_offset, &mut ident)?;
                let mut comment = vec![0u8; comment_info.packet_size];
                src.read_exact_at(comment_info.packet_offset, &mut comment)?;
                let mut setup = vec![0u8; setup_info.packet_size];
                src.read_exact_at(setup_info.packet_offset, &mut setup)?;

                let mut audio = PageWalker::new(0);
                audio.seek_page(comment_info.page_end);
                Ok((ident, comment, setup, PacketState::Pages(audio), comment_info.page_end))
            }
        }
    }

    /// Opens a reconstructed Vorbis stream.
    pub fn try_new(
        mut src: Box<dyn ByteSource>,
        variant: VorbisVariant,
        cfg: VorbisConfig,
        opts: &OpenOptions,
    ) -> Result<VorbisStream> {
        let (ident_packet, comment_packet, setup_packet, state, audio_start) =
            Self::make_headers(variant, &cfg, src.as_mut(), opts)?;

        let ident = lewton::header::read_header_ident(&ident_packet)
            .map_err(|_| toccata_core::errors::Error::DecodeError("vorbis: bad identification header"))?;
        lewton::header::read_header_comment(&comment_packet)
            .map_err(|_| toccata_core::errors::Error::DecodeError("vorbis: bad comment header"))?;
        let setup = lewton::header::read_header_setup(
            &setup_packet,
            ident.audio_channels,
            (ident.blocksize_0, ident.blocksize_1),
        )
        .map_err(|_| toccata_core::errors::Error::DecodeError("vorbis: bad setup header"))?;

        let channels = usize::from(ident.audio_channels);
        let mut info = StreamInfo::new(channels, ident.audio_sample_rate, cfg.num_frames);
        info.loops = cfg.loops;
        info.name = src.name().map(|n| n.to_string());

        Ok(VorbisStream {
            src,
            info,
            ident,
            setup,
            pwr: PreviousWindowRight::new(),
            state,
            audio_start,
            sample_buffer: Vec::new(),
            buffered: 0,
            consumed: 0,
            to_discard: 0,
            emitted: 0,
            poisoned: false,
        })
    }

    /// Restores the packet walk to the first audio packet.
    fn reset_packets(&mut self) {
        let start = self.audio_start;
        match &mut self.state {
            PacketState::Fsb { offset } => *offset = start,
            PacketState::Ogl { offset } => *offset = start,
            PacketState::Awc { offset, .. } => *offset = start,
            PacketState::Vid1 { offset, blocks } => {
                *offset = start;
                *blocks = vid1::Vid1Blocks::default();
            }
            PacketState::Pages(walker) => walker.seek_page(start),
            PacketState::Wwise(wwise) => wwise.seek_start(),
            PacketState::Oor(reader) => reader.reset(start),
        }
    }

    /// Pulls the next framed packet from the variant walker.
    fn next_packet(&mut self) -> Result<Option<Vec<u8>>> {
        let src = self.src.as_mut();
        match &mut self.state {
            PacketState::Fsb { offset } => fsb::next_packet(src, offset),
            PacketState::Ogl { offset } => ogl::next_packet(src, offset),
            PacketState::Awc { offset, data_start } => {
                awc::next_packet(src, offset, *data_start)
            }
            PacketState::Vid1 { offset, blocks } => vid1::next_packet(src, offset, blocks),
            PacketState::Pages(walker) => walker.next_packet(src),
            PacketState::Wwise(wwise) => wwise.next_packet(src),
            PacketState::Oor(reader) => reader.next_packet(src),
        }
    }

    /// Decodes packets until samples come out. False at end of stream.
    fn decode_more(&mut self) -> Result<bool> {
        loop {
            let packet = match self.next_packet()? {
                Some(packet) => packet,
                None => return Ok(false),
            };

            let decoded = match lewton::audio::read_audio_packet(
                &self.ident,
                &self.setup,
                &packet,
                &mut self.pwr,
            ) {
                Ok(decoded) => decoded,
                Err(err) => {
                    /* a stray non-audio packet is skipped, decoding continues */
                    debug!("vorbis: skipping undecodable packet: {:?}", err);
                    continue;
                }
            };

            let frames = decoded.first().map(|ch| ch.len()).unwrap_or(0);
            if frames == 0 {
                continue; /* the first packet primes the overlap and yields nothing */
            }

            let channels = self.info.channels;
            self.sample_buffer.resize(frames * channels, 0);
            for (ch, samples) in decoded.iter().enumerate() {
                for (i, &sample) in samples.iter().enumerate() {
                    self.sample_buffer[i * channels + ch] = sample;
                }
            }
            self.buffered = frames;
            self.consumed = 0;
            return Ok(true);
        }
    }

}

impl AudioStream for VorbisStream {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn decode(&mut self, out: &mut [i16]) -> Result<usize> {
        let channels = self.info.channels;
        let max_frames = out.len() / channels;
        let mut done = 0usize;

        while done < max_frames {
            if self.poisoned {
                break;
            }
            if self.info.num_frames > 0 && self.emitted >= self.info.num_frames {
                break;
            }

            if self.consumed < self.buffered {
                let mut avail = self.buffered - self.consumed;

                if self.to_discard > 0 {
                    let drop = (self.to_discard as usize).min(avail);
                    self.consumed += drop;
                    self.to_discard -= drop as u64;
                    continue;
                }

                avail = avail.min(max_frames - done);
                if self.info.num_frames > 0 {
                    avail = avail.min((self.info.num_frames - self.emitted) as usize);
                }
                let src_start = self.consumed * channels;
                let dst_start = done * channels;
                out[dst_start..dst_start + avail * channels]
                    .copy_from_slice(&self.sample_buffer[src_start..src_start + avail * channels]);

                self.consumed += avail;
                self.emitted += avail as u64;
                done += avail;
                continue;
            }

            match self.decode_more() {
                Ok(true) => (),
                Ok(false) => break,
                Err(err) => {
                    debug!("vorbis: fatal packet error: {}", err);
                    self.poisoned = true;
                    out[done * channels..max_frames * channels].fill(0);
                    break;
                }
            }
        }

        Ok(done)
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        if self.info.num_frames > 0 && frame > self.info.num_frames {
            return seek_error(SeekErrorKind::OutOfRange);
        }

        // Restart and discard; the custom framings have no packet-level seek index.
        self.reset_packets();
        self.pwr = PreviousWindowRight::new();
        self.buffered = 0;
        self.consumed = 0;
        self.to_discard = frame;
        self.emitted = frame;
        Ok(())
    }
}
