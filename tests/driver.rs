//! End-to-end driver tests against a simulated card.
//!
//! `MockCard` implements the bus seam and behaves like a card on the other
//! end of the wire: it parses command frames byte by byte, runs the
//! SD/MMC negotiation for a configurable card generation, serves data
//! packets with real CRC16 trailers and accepts written blocks into a
//! sparse block store. Fault hooks let individual tests corrupt packets or
//! jam the busy line.

use std::collections::{HashMap, VecDeque};

use sdcard_spi::constants::{CMD17, INVALID_R1};
use sdcard_spi::crc::{crc16, crc7};
use sdcard_spi::{
    AddressMode, CardType, InitError, SdSpiConfig, SdSpiDriver, SpiBusOps, SpiBusResult,
    TransferKind,
};

const BLOCK: usize = 512;

// 4 GiB high-capacity CSD (structure v2, C_SIZE 8191).
const CSD_V2_RAW: [u8; 16] = [
    0x40, 0x0E, 0x00, 0x32, 0x5B, 0x59, 0x00, 0x00, 0x1F, 0xFF, 0x7F, 0x80, 0x0A, 0x40, 0x00, 0x01,
];

// 512 MiB standard-capacity CSD (structure v1, C_SIZE 2047, mult 7).
const CSD_V1_RAW: [u8; 16] = [
    0x00, 0x26, 0x00, 0x32, 0x5B, 0x59, 0x81, 0xFF, 0xED, 0xDB, 0xCF, 0x80, 0x12, 0x40, 0x00, 0x01,
];

const CID_RAW: [u8; 16] = [
    0x1B, b'S', b'M', b'E', b'D', b'1', b'6', b'G', 0x30, 0x12, 0x34, 0x56, 0x78, 0x01, 0x5B, 0xB7,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Profile {
    /// SDHC: answers CMD8, negotiates with HCS, block addressed.
    Sdhc,
    /// SD v1: rejects CMD8, negotiates over plain ACMD41, byte addressed.
    SdV1,
    /// MMC: rejects CMD8 and CMD55, negotiates over CMD1, byte addressed.
    Mmc,
    /// Empty slot: never drives the line.
    Dead,
}

enum State {
    Idle,
    Frame { buf: [u8; 6], len: usize },
    AwaitToken { multi: bool },
    Data { buf: Vec<u8>, multi: bool },
}

struct MockCard {
    profile: Profile,
    state: State,
    selected: bool,
    out: VecDeque<u8>,
    blocks: HashMap<u32, [u8; BLOCK]>,
    cmd_log: Vec<(u8, u32)>,
    frames: Vec<[u8; 6]>,
    acmd: bool,
    acmd41_polls: u32,
    cmd1_polls: u32,
    ocr: u32,
    write_addr: u32,
    read_stream: Option<(u32, bool)>,
    stream_index: usize,
    corrupt_read_crc_at: Option<usize>,
    reject_writes: bool,
    jam_busy_after_write: bool,
    busy_release_byte: Option<u8>,
    busy_forever: bool,
    clock_history: Vec<u32>,
}

impl MockCard {
    fn new(profile: Profile) -> Self {
        let ocr = match profile {
            Profile::Sdhc => 0xC0FF_8000,
            _ => 0x80FF_8000,
        };
        MockCard {
            profile,
            state: State::Idle,
            selected: false,
            out: VecDeque::new(),
            blocks: HashMap::new(),
            cmd_log: Vec::new(),
            frames: Vec::new(),
            acmd: false,
            acmd41_polls: 2,
            cmd1_polls: 2,
            ocr,
            write_addr: 0,
            read_stream: None,
            stream_index: 0,
            corrupt_read_crc_at: None,
            reject_writes: false,
            jam_busy_after_write: false,
            busy_release_byte: None,
            busy_forever: false,
            clock_history: Vec::new(),
        }
    }

    fn byte_addressed(&self) -> bool {
        !matches!(self.profile, Profile::Sdhc)
    }

    fn block_index(&self, arg: u32) -> u32 {
        if self.byte_addressed() {
            assert_eq!(arg % BLOCK as u32, 0, "byte address not block aligned");
            arg / BLOCK as u32
        } else {
            arg
        }
    }

    fn block_data(&self, addr: u32) -> [u8; BLOCK] {
        self.blocks.get(&addr).copied().unwrap_or([0u8; BLOCK])
    }

    fn queue_packet(&mut self, payload: &[u8], corrupt: bool) {
        self.out.push_back(0xFF);
        self.out.push_back(0xFE);
        self.out.extend(payload.iter().copied());
        let mut crc = crc16(payload);
        if corrupt {
            crc ^= 0xFFFF;
        }
        self.out.extend(crc.to_be_bytes());
    }

    fn pop_out(&mut self) -> u8 {
        if let Some(byte) = self.out.pop_front() {
            return byte;
        }
        if self.busy_forever {
            return 0x00;
        }
        if let Some((addr, multi)) = self.read_stream {
            let data = self.block_data(addr);
            let corrupt = self.corrupt_read_crc_at == Some(self.stream_index);
            self.stream_index += 1;
            self.queue_packet(&data, corrupt);
            self.read_stream = if multi { Some((addr + 1, true)) } else { None };
            return self.out.pop_front().unwrap();
        }
        0xFF
    }

    fn exchange(&mut self, byte: u8) -> u8 {
        if self.profile == Profile::Dead || !self.selected {
            return 0xFF;
        }
        let state = std::mem::replace(&mut self.state, State::Idle);
        match state {
            State::Idle => {
                if byte & 0xC0 == 0x40 {
                    let mut buf = [0u8; 6];
                    buf[0] = byte;
                    self.state = State::Frame { buf, len: 1 };
                    0xFF
                } else {
                    self.pop_out()
                }
            }
            State::Frame { mut buf, len } => {
                buf[len] = byte;
                if len + 1 == buf.len() {
                    self.handle_frame(buf);
                } else {
                    self.state = State::Frame { buf, len: len + 1 };
                }
                0xFF
            }
            State::AwaitToken { multi } => match byte {
                0xFE if !multi => {
                    self.state = State::Data { buf: Vec::new(), multi };
                    0xFF
                }
                0xFC if multi => {
                    self.state = State::Data { buf: Vec::new(), multi };
                    0xFF
                }
                0xFD if multi => {
                    // Stop-tran: commit and hold the line busy briefly.
                    self.out.extend([0x00, 0x00]);
                    0xFF
                }
                _ => {
                    self.state = State::AwaitToken { multi };
                    self.pop_out()
                }
            },
            State::Data { mut buf, multi } => {
                buf.push(byte);
                if buf.len() == BLOCK + 2 {
                    if multi {
                        self.state = State::AwaitToken { multi: true };
                    }
                    self.finish_write(buf);
                } else {
                    self.state = State::Data { buf, multi };
                }
                0xFF
            }
        }
    }

    fn finish_write(&mut self, packet: Vec<u8>) {
        let data: [u8; BLOCK] = packet[..BLOCK].try_into().unwrap();
        let received = u16::from_be_bytes([packet[BLOCK], packet[BLOCK + 1]]);
        if self.reject_writes {
            self.out.push_back(0x0D);
            return;
        }
        if received != crc16(&data) {
            self.out.push_back(0x0B);
            return;
        }
        self.blocks.insert(self.write_addr, data);
        self.write_addr += 1;
        self.out.push_back(0x05);
        if self.jam_busy_after_write {
            self.busy_forever = true;
        } else if let Some(release) = self.busy_release_byte {
            // Line released on a byte boundary the host did not expect.
            self.out.push_back(release);
        } else {
            self.out.push_back(0x00);
        }
    }

    fn handle_frame(&mut self, frame: [u8; 6]) {
        let cmd = frame[0] & 0x3F;
        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        assert_eq!(frame[5], crc7(&frame[..5]), "bad CRC7 on CMD{}", cmd);
        self.frames.push(frame);
        self.cmd_log.push((cmd, arg));
        let acmd = std::mem::replace(&mut self.acmd, false);

        if cmd == 12 {
            // STOP_TRANSMISSION aborts the stream; whatever was queued is
            // never clocked out.
            self.read_stream = None;
            self.out.clear();
            self.out.extend([0xFF, 0xFF, 0x00, 0x00]);
            return;
        }

        self.out.push_back(0xFF);
        match cmd {
            0 => self.out.push_back(0x01),
            8 => {
                if self.profile == Profile::Sdhc {
                    assert_eq!(arg, 0x1B5);
                    self.out.push_back(0x01);
                    self.out.extend([0x00, 0x00, 0x01, 0xB5]);
                } else {
                    self.out.push_back(0x05);
                }
            }
            55 => {
                if self.profile == Profile::Mmc {
                    self.out.push_back(0x05);
                } else {
                    self.acmd = true;
                    self.out.push_back(0x01);
                }
            }
            41 if acmd => {
                match self.profile {
                    Profile::Sdhc => assert_eq!(arg, 0x4000_0000),
                    _ => assert_eq!(arg, 0),
                }
                if self.acmd41_polls > 0 {
                    self.acmd41_polls -= 1;
                    self.out.push_back(0x01);
                } else {
                    self.out.push_back(0x00);
                }
            }
            1 => {
                if self.cmd1_polls > 0 {
                    self.cmd1_polls -= 1;
                    self.out.push_back(0x01);
                } else {
                    self.out.push_back(0x00);
                }
            }
            58 => {
                self.out.push_back(0x00);
                self.out.extend(self.ocr.to_be_bytes());
            }
            16 => {
                assert_eq!(arg, BLOCK as u32);
                self.out.push_back(0x00);
            }
            59 => self.out.push_back(0x00),
            10 => {
                self.out.push_back(0x00);
                self.queue_packet(&CID_RAW, false);
            }
            9 => {
                self.out.push_back(0x00);
                let csd = if self.profile == Profile::Sdhc {
                    CSD_V2_RAW
                } else {
                    CSD_V1_RAW
                };
                self.queue_packet(&csd, false);
            }
            17 | 18 => {
                self.out.push_back(0x00);
                self.stream_index = 0;
                self.read_stream = Some((self.block_index(arg), cmd == 18));
            }
            24 | 25 => {
                self.out.push_back(0x00);
                self.write_addr = self.block_index(arg);
                self.state = State::AwaitToken { multi: cmd == 25 };
            }
            _ => self.out.push_back(0x04),
        }
    }
}

impl SpiBusOps for MockCard {
    fn transfer_byte(&mut self, out: u8) -> SpiBusResult<u8> {
        Ok(self.exchange(out))
    }

    fn select(&mut self) -> SpiBusResult {
        self.selected = true;
        Ok(())
    }

    fn deselect(&mut self) -> SpiBusResult {
        self.selected = false;
        self.state = State::Idle;
        self.out.clear();
        self.read_stream = None;
        Ok(())
    }

    fn set_clock(&mut self, hz: u32) -> SpiBusResult {
        self.clock_history.push(hz);
        Ok(())
    }
}

fn init_driver(profile: Profile) -> SdSpiDriver<MockCard> {
    let mut driver = SdSpiDriver::new(MockCard::new(profile));
    driver.init().expect("init failed");
    driver
}

fn pattern_block(seed: u8) -> [u8; BLOCK] {
    let mut data = [0u8; BLOCK];
    for (i, byte) in data.iter_mut().enumerate() {
        *byte = seed.wrapping_add(i as u8);
    }
    data
}

#[test]
fn sdhc_card_initializes_block_addressed() {
    let driver = init_driver(Profile::Sdhc);
    let card = driver.card();
    assert!(card.is_initialized());
    assert_eq!(card.card_type(), CardType::SdV2);
    assert_eq!(card.address_mode(), AddressMode::Block);
    assert!(card.crc_enabled());
    assert_eq!(driver.capacity(), 4 * 1024 * 1024 * 1024);
    assert_eq!(driver.sector_count(), 8 * 1024 * 1024);
    assert_eq!(card.cid().manufacturer_id, 0x1B);
    assert_eq!(&card.cid().product_name, b"ED16G");
}

#[test]
fn legacy_sd_card_initializes_byte_addressed() {
    let driver = init_driver(Profile::SdV1);
    let card = driver.card();
    assert_eq!(card.card_type(), CardType::SdV1);
    assert_eq!(card.address_mode(), AddressMode::Byte);
    assert_eq!(driver.capacity(), 512 * 1024 * 1024);
}

#[test]
fn mmc_card_falls_back_to_cmd1() {
    let driver = init_driver(Profile::Mmc);
    assert_eq!(driver.card().card_type(), CardType::MmcV3);
    // CMD1 was used and ACMD41 was never reached.
    let cmds: Vec<u8> = driver.bus().cmd_log.iter().map(|&(c, _)| c).collect();
    assert!(cmds.contains(&1));
    assert!(!cmds.contains(&41));
}

#[test]
fn empty_slot_reports_no_card() {
    let mut driver = SdSpiDriver::new(MockCard::new(Profile::Dead));
    assert_eq!(driver.init(), Err(InitError::NoCard));
    assert!(!driver.card().is_initialized());
}

#[test]
fn ocr_voltage_mismatch_aborts_init() {
    let mut card = MockCard::new(Profile::Sdhc);
    card.ocr = 0xC000_0000; // powered up, but no voltage window bits
    let mut driver = SdSpiDriver::new(card);
    assert_eq!(driver.init(), Err(InitError::VoltageMismatch));
    assert!(!driver.card().is_initialized());
}

#[test]
fn init_switches_clock_rates() {
    let driver = init_driver(Profile::Sdhc);
    let config = SdSpiConfig::default();
    let history = &driver.bus().clock_history;
    assert_eq!(history.first(), Some(&config.clock_preinit_hz));
    assert_eq!(history.last(), Some(&config.clock_postinit_hz));
}

#[test]
fn reads_before_init_are_rejected() {
    let mut driver = SdSpiDriver::new(MockCard::new(Profile::Sdhc));
    let mut buf = [0u8; BLOCK];
    let err = driver.read_blocks(0, &mut buf).unwrap_err();
    assert_eq!(err.kind, TransferKind::NotSupported);
}

#[test]
fn partial_block_buffers_are_rejected() {
    let mut driver = init_driver(Profile::Sdhc);
    let mut buf = [0u8; BLOCK + 1];
    let err = driver.read_blocks(0, &mut buf).unwrap_err();
    assert_eq!(err.kind, TransferKind::NotSupported);
    assert_eq!(driver.read_blocks(0, &mut []).unwrap_err().kind, TransferKind::NotSupported);
}

#[test]
fn single_block_read_uses_block_address() {
    let mut card = MockCard::new(Profile::Sdhc);
    card.blocks.insert(5, pattern_block(0xA0));
    let mut driver = SdSpiDriver::new(card);
    driver.init().unwrap();

    let mut buf = [0u8; BLOCK];
    assert_eq!(driver.read_blocks(5, &mut buf), Ok(1));
    assert_eq!(buf, pattern_block(0xA0));
    assert!(driver.bus().cmd_log.contains(&(17, 5)));
}

#[test]
fn single_block_read_uses_byte_address_on_legacy_card() {
    let mut card = MockCard::new(Profile::SdV1);
    card.blocks.insert(3, pattern_block(0x11));
    let mut driver = SdSpiDriver::new(card);
    driver.init().unwrap();

    let mut buf = [0u8; BLOCK];
    assert_eq!(driver.read_blocks(3, &mut buf), Ok(1));
    assert_eq!(buf, pattern_block(0x11));
    assert!(driver.bus().cmd_log.contains(&(17, 3 * BLOCK as u32)));
}

#[test]
fn multi_block_read_streams_and_stops() {
    let mut card = MockCard::new(Profile::Sdhc);
    for i in 0..3 {
        card.blocks.insert(10 + i, pattern_block(i as u8));
    }
    let mut driver = SdSpiDriver::new(card);
    driver.init().unwrap();

    let mut buf = [0u8; 3 * BLOCK];
    assert_eq!(driver.read_blocks(10, &mut buf), Ok(3));
    for i in 0..3 {
        assert_eq!(buf[i * BLOCK..(i + 1) * BLOCK], pattern_block(i as u8));
    }
    let cmds: Vec<u8> = driver.bus().cmd_log.iter().map(|&(c, _)| c).collect();
    assert!(cmds.contains(&18));
    assert_eq!(cmds.last(), Some(&12));
}

#[test]
fn write_then_read_round_trip() {
    let mut driver = init_driver(Profile::Sdhc);

    let mut data = [0u8; 2 * BLOCK];
    data[..BLOCK].copy_from_slice(&pattern_block(0x42));
    data[BLOCK..].copy_from_slice(&pattern_block(0x43));
    assert_eq!(driver.write_blocks(100, &data), Ok(2));
    assert_eq!(driver.bus().blocks[&100], pattern_block(0x42));
    assert_eq!(driver.bus().blocks[&101], pattern_block(0x43));

    let mut readback = [0u8; 2 * BLOCK];
    assert_eq!(driver.read_blocks(100, &mut readback), Ok(2));
    assert_eq!(readback, data);
}

#[test]
fn single_block_write_uses_cmd24() {
    let mut driver = init_driver(Profile::Sdhc);
    let data = pattern_block(0x7E);
    assert_eq!(driver.write_blocks(9, &data), Ok(1));
    assert!(driver.bus().cmd_log.contains(&(24, 9)));
    assert_eq!(driver.bus().blocks[&9], data);
}

#[test]
fn corrupt_packet_stops_read_with_progress() {
    let mut card = MockCard::new(Profile::Sdhc);
    for i in 0..3 {
        card.blocks.insert(i, pattern_block(0x50 + i as u8));
    }
    card.corrupt_read_crc_at = Some(1);
    let mut driver = SdSpiDriver::new(card);
    driver.init().unwrap();

    let mut buf = [0u8; 3 * BLOCK];
    let err = driver.read_blocks(0, &mut buf).unwrap_err();
    assert_eq!(err.kind, TransferKind::CrcMismatch);
    assert_eq!(err.blocks_done, 1);
    // The block completed before the failure is valid.
    assert_eq!(buf[..BLOCK], pattern_block(0x50));
}

#[test]
fn rejected_write_reports_no_progress() {
    let mut card = MockCard::new(Profile::Sdhc);
    card.reject_writes = true;
    let mut driver = SdSpiDriver::new(card);
    driver.init().unwrap();

    let err = driver.write_blocks(0, &pattern_block(0)).unwrap_err();
    assert_eq!(err.kind, TransferKind::WriteRejected);
    assert_eq!(err.blocks_done, 0);
    assert!(driver.bus().blocks.is_empty());
}

#[test]
fn jammed_busy_line_times_out() {
    let mut card = MockCard::new(Profile::Sdhc);
    card.jam_busy_after_write = true;
    let mut driver = SdSpiDriver::new(card);
    driver.init().unwrap();

    let err = driver.write_blocks(0, &pattern_block(0)).unwrap_err();
    assert_eq!(err.kind, TransferKind::Timeout);
    assert_eq!(err.blocks_done, 0);
}

#[test]
fn negative_retry_budget_polls_until_ready() {
    // A negative budget means the negotiation loops poll without bound.
    let mut card = MockCard::new(Profile::Sdhc);
    card.acmd41_polls = 5;
    let mut config = SdSpiConfig::default();
    config.init_cmd_retries = -1;
    let mut driver = SdSpiDriver::with_config(card, config.clone());
    assert_eq!(driver.init(), Ok(()));
    assert_eq!(driver.card().card_type(), CardType::SdV2);

    let mut card = MockCard::new(Profile::Mmc);
    card.cmd1_polls = 5;
    let mut driver = SdSpiDriver::with_config(card, config);
    assert_eq!(driver.init(), Ok(()));
    assert_eq!(driver.card().card_type(), CardType::MmcV3);
}

#[test]
fn busy_card_blocks_command_transmission() {
    // A command must not be framed while the card still signals busy; the
    // dispatcher gives up without putting anything on the wire.
    let mut driver = init_driver(Profile::Sdhc);
    let frames_before = driver.bus().frames.len();

    driver.bus_mut().busy_forever = true;
    let r1 = driver.send_cmd(CMD17, 0, 0);
    assert_eq!(r1, INVALID_R1);
    assert_eq!(driver.bus().frames.len(), frames_before);
}

#[test]
fn any_nonzero_byte_ends_the_busy_wait() {
    // The card may release the line on a byte the host does not sample as
    // 0xFF; a single poll must still recognize it as not-busy.
    let mut card = MockCard::new(Profile::Sdhc);
    card.busy_release_byte = Some(0x3F);
    let mut config = SdSpiConfig::default();
    config.not_busy_retries = 0;
    let mut driver = SdSpiDriver::with_config(card, config);
    driver.init().unwrap();
    assert_eq!(driver.write_blocks(0, &pattern_block(0x21)), Ok(1));
}

#[test]
fn every_command_frame_carries_a_valid_crc7() {
    let mut driver = init_driver(Profile::Sdhc);
    let mut buf = [0u8; BLOCK];
    driver.read_blocks(0, &mut buf).unwrap();
    driver.write_blocks(1, &buf).unwrap();

    let frames = &driver.bus().frames;
    assert!(frames.len() > 10);
    for frame in frames {
        assert_eq!(frame[5], crc7(&frame[..5]));
        assert_eq!(frame[5] & 1, 1, "end bit missing");
    }
}
