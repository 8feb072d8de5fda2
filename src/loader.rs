//! Top-level orchestration: config text in, kernel handover out (spec §4, §8).
//!
//! Mirrors the shape of the teacher's `fzboot/main/src/main.rs::boot_main` — a flat sequence
//! of stage calls ending in a divergent jump — but each stage here is driven through a
//! capability trait (`MemoryServices`, `Filesystem`, `VideoServices`, `ArchJump`) instead of a
//! hardwired global, and the sequence is checked against [`state::StateMachine`] as it goes so
//! a future edit here cannot silently reorder the handover's safety-critical steps.

use crate::arch::{ArchJump, JumpParams};
use crate::config::{self, mandatory, Config, Scope, Value, ValueKind};
use crate::consts::{direct_map, HIGHER_HALF_BASE};
use crate::elf::{self, LoadResult};
use crate::error::{CapabilityError, ConfigSemanticError, Fatal, IoError, ResourceError};
use crate::fs::{FilesystemTable, FsLookupError};
use crate::mem::addr::{MemoryAddress, PhyAddr, VirtAddr};
use crate::mem::services::{allocate_critical, BootMemoryType, Criticality, MemoryServices};
use crate::paging;
use crate::protocol::{self, HandoverInputs, ModuleInput};
use crate::state::{State, StateMachine};
use crate::video::{self, Constraint, FramebufferDescriptor, VideoRequest, VideoServices};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

const DEFAULT_STACK_BYTES: u64 = 64 * 1024;

/// Everything `loader::run` needs that only firmware glue code can supply.
pub struct Environment<'a> {
    pub memory: Box<dyn MemoryServices>,
    pub filesystems: &'a FilesystemTable,
    pub video: &'a mut dyn VideoServices,
    pub arch: &'a dyn ArchJump,
    /// Checked by the caller via CPUID before calling in; a 64-bit kernel on a CPU without
    /// long mode is a [`CapabilityError`], not something this module can detect itself.
    pub long_mode_available: bool,
}

fn fs_err_to_fatal(e: FsLookupError) -> Fatal {
    match e {
        FsLookupError::Path(p) => p.into(),
        FsLookupError::Io(io) => io.into(),
    }
}

fn read_whole_file(filesystems: &FilesystemTable, path: &str) -> Result<Vec<u8>, Fatal> {
    let (fs, inner_path) = filesystems.fs_by_full_path(path).map_err(fs_err_to_fatal)?;
    let mut file = fs.open(inner_path).ok_or(Fatal::from(IoError::NotFound))?;
    let size = file.size();
    let mut buf = alloc::vec![0u8; size];
    let ok = file.read(&mut buf, 0, size);
    fs.close(file);
    if !ok {
        return Err(IoError::ReadFailed.into());
    }
    Ok(buf)
}

struct BinarySelector<'a> {
    path: &'a str,
    allocate_anywhere: bool,
}

fn read_binary_key<'a>(cfg: &Config<'a>, scope: Scope, key: &'static str) -> Result<BinarySelector<'a>, Fatal> {
    let (value, _) = mandatory(cfg.get_one_of(scope, key, ValueKind::STRING.union(ValueKind::OBJECT)), key)?;
    match value {
        Value::String(path) => Ok(BinarySelector {
            path,
            allocate_anywhere: false,
        }),
        Value::Object(obj_scope) => {
            let path = mandatory(cfg.get_str(obj_scope, "path"), "path")?;
            let allocate_anywhere = cfg.get_bool(obj_scope, "allocate-anywhere")?.unwrap_or(false);
            Ok(BinarySelector { path, allocate_anywhere })
        }
        _ => unreachable!("get_one_of only returns values matching the requested mask"),
    }
}

struct ModuleSelector<'a> {
    path: &'a str,
    name: Option<&'a str>,
}

fn collect_modules<'a>(cfg: &Config<'a>, scope: Scope) -> Result<Vec<ModuleSelector<'a>>, Fatal> {
    let mut out = Vec::new();
    let mut cursor = cfg.get_first_one_of(scope, "module", ValueKind::STRING.union(ValueKind::OBJECT))?;
    while let Some((value, offset)) = cursor {
        let selector = match value {
            Value::String(path) => ModuleSelector { path, name: None },
            Value::Object(obj_scope) => ModuleSelector {
                path: mandatory(cfg.get_str(obj_scope, "path"), "path")?,
                name: cfg.get_str(obj_scope, "name")?,
            },
            _ => unreachable!("get_first_one_of only returns values matching the requested mask"),
        };
        out.push(selector);
        cursor = cfg.get_next(offset, "module");
    }
    Ok(out)
}

fn load_module_raw(
    data: &[u8],
    services: &mut dyn MemoryServices,
) -> Result<(PhyAddr, u64), Fatal> {
    let pages = (data.len() as u64).div_ceil(4096).max(1) as usize;
    let phys = allocate_critical(services, pages, BootMemoryType::Modules)?;

    #[cfg(not(test))]
    unsafe {
        let dest = phys.as_mut_ptr::<u8>();
        core::ptr::copy_nonoverlapping(data.as_ptr(), dest, data.len());
        core::ptr::write_bytes(dest.add(data.len()), 0, pages * 4096 - data.len());
    }

    Ok((phys, data.len() as u64))
}

fn parse_video_request(cfg: &Config<'_>, scope: Scope) -> Result<Option<VideoRequest>, Fatal> {
    let Some((value, _)) = cfg.get_one_of(
        scope,
        "video-mode",
        ValueKind::NONE.union(ValueKind::STRING).union(ValueKind::OBJECT),
    )?
    else {
        return Ok(None);
    };

    match value {
        Value::None => Ok(None),
        Value::String("unset") => Ok(None),
        Value::String("auto") => Ok(Some(VideoRequest::AUTO)),
        Value::String(_) => Err(ConfigSemanticError::InvalidEnumLiteral { key: "video-mode" }.into()),
        Value::Object(obj_scope) => {
            let width = mandatory(cfg.get_u64(obj_scope, "width"), "width")? as u32;
            let height = mandatory(cfg.get_u64(obj_scope, "height"), "height")? as u32;
            let bpp = mandatory(cfg.get_u64(obj_scope, "bpp"), "bpp")? as u8;
            let constraint = match cfg.get_str(obj_scope, "constraint")? {
                None | Some("at-least") => Constraint::AtLeast,
                Some("exactly") => Constraint::Exactly,
                Some(_) => return Err(ConfigSemanticError::InvalidEnumLiteral { key: "constraint" }.into()),
            };
            Ok(Some(VideoRequest { width, height, bpp, constraint }))
        }
        _ => unreachable!(),
    }
}

/// Physical base and size of the kernel stack, per the `stack` key (spec §6).
fn resolve_stack(
    cfg: &Config<'_>,
    scope: Scope,
    services: &mut dyn MemoryServices,
) -> Result<(PhyAddr, u64), Fatal> {
    let stack_value = cfg.get_one_of(scope, "stack", ValueKind::STRING.union(ValueKind::OBJECT))?;

    let (at_fixed, size_bytes) = match stack_value.map(|(v, _)| v) {
        None | Some(Value::String("auto")) => (None, DEFAULT_STACK_BYTES),
        Some(Value::Object(obj_scope)) => {
            let at = match cfg.get_one_of(obj_scope, "allocate-at", ValueKind::STRING.union(ValueKind::UNSIGNED))? {
                None | Some((Value::String("anywhere"), _)) => None,
                Some((Value::Unsigned(addr), _)) => Some(PhyAddr::new(addr)),
                Some((Value::String(_), _)) => {
                    return Err(ConfigSemanticError::InvalidEnumLiteral { key: "allocate-at" }.into())
                }
                _ => unreachable!("get_one_of only returns values matching the requested mask"),
            };
            let size = match cfg.get_one_of(obj_scope, "size", ValueKind::STRING.union(ValueKind::UNSIGNED))? {
                None | Some((Value::String("auto"), _)) => DEFAULT_STACK_BYTES,
                Some((Value::Unsigned(n), _)) => n,
                Some((Value::String(_), _)) => {
                    return Err(ConfigSemanticError::InvalidEnumLiteral { key: "size" }.into())
                }
                _ => unreachable!("get_one_of only returns values matching the requested mask"),
            };
            (at, size)
        }
        Some(Value::String(_)) => return Err(ConfigSemanticError::InvalidEnumLiteral { key: "stack" }.into()),
        _ => unreachable!(),
    };

    let pages = size_bytes.div_ceil(4096).max(1) as usize;
    let base = match at_fixed {
        Some(addr) => {
            if !services.allocate_pages_at(addr, pages, BootMemoryType::KernelStack) {
                return Err(ResourceError::AllocationFailed.into());
            }
            addr
        }
        None => services
            .allocate_pages(Criticality::Critical, pages, BootMemoryType::KernelStack)
            .ok_or(ResourceError::AllocationFailed)?,
    };
    Ok((base, pages as u64 * 4096))
}

fn to_kernel_visible(higher_half: bool, phys: PhyAddr) -> VirtAddr {
    if higher_half {
        direct_map(phys.as_u64())
    } else {
        VirtAddr::new(phys.as_u64())
    }
}

/// Run the full boot sequence against `cfg`'s `entry_name` entry and hand off to the kernel.
/// Never returns: either a fatal error halts the system, or the architecture jump takes over.
pub fn run(config_text: &str, entry_name: &'static str, env: Environment) -> ! {
    match try_run(config_text, entry_name, env) {
        Ok(never) => match never {},
        Err(e) => fatal_halt(e),
    }
}

fn try_run(config_text: &str, entry_name: &'static str, mut env: Environment) -> Result<core::convert::Infallible, Fatal> {
    let mut sm = StateMachine::new();

    let cfg = config::parse(config_text)?;
    sm.advance_to(State::ConfigParsed);

    let entry = cfg
        .loadable_entry(entry_name)
        .ok_or(ConfigSemanticError::MissingKey { key: entry_name })?;
    sm.advance_to(State::EntrySelected);

    let binary = read_binary_key(&cfg, entry.cfg_off, "binary")?;
    if binary.allocate_anywhere {
        // 64-bit-only per spec §4.4; `elf_load` itself rejects a 32-bit allocate-anywhere
        // request, but long-mode availability is a CPU fact the loader cannot derive from the
        // ELF alone.
        if !env.long_mode_available {
            return Err(CapabilityError::LongModeUnavailable.into());
        }
    }
    let kernel_bytes = read_whole_file(env.filesystems, binary.path)?;
    let kernel: LoadResult = elf::elf_load(
        &kernel_bytes,
        binary.allocate_anywhere,
        BootMemoryType::KernelBinary,
        env.memory.as_mut(),
    )?;
    if kernel.bitness == elf::Bitness::Bits64 && !env.long_mode_available {
        return Err(CapabilityError::LongModeUnavailable.into());
    }
    sm.advance_to(State::KernelLoaded);

    let higher_half = kernel.entrypoint.as_u64() >= HIGHER_HALF_BASE;

    let module_selectors = collect_modules(&cfg, entry.cfg_off)?;
    let mut modules: Vec<(PhyAddr, u64, Option<String>)> = Vec::with_capacity(module_selectors.len());
    let mut unnamed_count = 0u32;
    for selector in &module_selectors {
        let bytes = read_whole_file(env.filesystems, selector.path)?;
        let (phys, size) = load_module_raw(&bytes, env.memory.as_mut())?;
        let name = match selector.name {
            Some(n) => Some(String::from(n)),
            None => {
                unnamed_count += 1;
                Some(alloc::format!("unnamed_module{unnamed_count}"))
            }
        };
        modules.push((phys, size, name));
    }
    sm.advance_to(State::ModulesLoaded);

    let kernel_span = kernel.physical_ceiling.as_u64() - kernel.physical_base.as_u64();
    let page_tables = paging::build_page_tables(
        env.memory.as_mut(),
        kernel.virtual_base,
        kernel.physical_base,
        kernel_span,
        kernel.kernel_range_is_direct_map,
    )?;
    sm.advance_to(State::PagingBuilt);

    let (stack_base, stack_size) = resolve_stack(&cfg, entry.cfg_off, env.memory.as_mut())?;
    let stack_top_phys = PhyAddr::new(stack_base.as_u64() + stack_size);
    sm.advance_to(State::StackReady);

    let framebuffer: Option<FramebufferDescriptor> = match parse_video_request(&cfg, entry.cfg_off)? {
        Some(request) => {
            let mode = video::pick_mode(env.video, request)?;
            env.video.set_mode(mode)
        }
        None => None,
    };
    sm.advance_to(State::VideoSet);

    let cmdline = cfg.get_str(entry.cfg_off, "cmdline")?;

    let module_inputs: Vec<ModuleInput<'_>> = modules
        .iter()
        .map(|(phys, size, name)| ModuleInput {
            physical_base: *phys,
            size: *size,
            name: name.as_deref(),
        })
        .collect();

    let inputs = HandoverInputs {
        kernel_entrypoint: kernel.entrypoint,
        modules: &module_inputs,
        cmdline,
        framebuffer,
    };
    sm.advance_to(State::ArrayBuilt);

    let finalized = protocol::finalize_memory_map(env.memory, &inputs)?;
    finalized.key.handover()?;
    sm.advance_to(State::HandoverArmed);

    let params = JumpParams {
        entrypoint: kernel.entrypoint,
        stack_top: to_kernel_visible(higher_half, stack_top_phys),
        attribute_array: finalized.kernel_visible_array,
        magic: protocol::ULTRA_MAGIC,
    };
    sm.advance_to(State::Jumped);

    match kernel.bitness {
        elf::Bitness::Bits32 => env.arch.jump32(params),
        elf::Bitness::Bits64 => env.arch.jump64(params, page_tables.pml4),
    }
}

fn fatal_halt(err: Fatal) -> ! {
    crate::error!("fatal boot error: {err}");
    loop {
        #[cfg(target_arch = "x86_64")]
        unsafe {
            core::arch::asm!("cli; hlt", options(nomem, nostack));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::mock::{MockArchJump, RecordedJump};
    use crate::fs::{File, Filesystem, MountSelector};
    use crate::mem::services::mock::MockMemoryServices;
    use crate::video::VideoMode;
    use alloc::boxed::Box;
    use alloc::vec;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[derive(Debug)]
    struct MemFile {
        data: Vec<u8>,
    }
    impl File for MemFile {
        fn read(&mut self, buf: &mut [u8], offset: usize, len: usize) -> bool {
            if offset + len > self.data.len() {
                return false;
            }
            buf[..len].copy_from_slice(&self.data[offset..offset + len]);
            true
        }
        fn size(&self) -> usize {
            self.data.len()
        }
    }

    #[derive(Debug)]
    struct MemFs {
        kernel: Vec<u8>,
    }
    impl Filesystem for MemFs {
        fn open(&self, path: &str) -> Option<Box<dyn File>> {
            if path == "/k.elf" {
                Some(Box::new(MemFile { data: self.kernel.clone() }))
            } else {
                None
            }
        }
    }

    struct NoVideo;
    impl VideoServices for NoVideo {
        fn native_resolution(&self) -> (u32, u32) {
            (0, 0)
        }
        fn modes(&self) -> &[VideoMode] {
            &[]
        }
        fn set_mode(&mut self, _mode: VideoMode) -> Option<FramebufferDescriptor> {
            None
        }
    }

    fn make_elf32(entry: u32) -> Vec<u8> {
        const EHDR32_SIZE: usize = 52;
        const PHDR32_SIZE: usize = 32;
        let mut buf = vec![0u8; EHDR32_SIZE];
        buf[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        buf[4] = 1; // ELFCLASS32
        buf[5] = 1; // ELFDATA2LSB
        buf[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        buf[24..28].copy_from_slice(&entry.to_le_bytes());
        buf[28..32].copy_from_slice(&(EHDR32_SIZE as u32).to_le_bytes());
        buf[42..44].copy_from_slice(&(PHDR32_SIZE as u16).to_le_bytes());
        buf[44..46].copy_from_slice(&1u16.to_le_bytes());

        let ph_start = buf.len();
        buf.resize(ph_start + PHDR32_SIZE, 0);
        buf[ph_start..ph_start + 4].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
        buf[ph_start + 4..ph_start + 8].copy_from_slice(&0u32.to_le_bytes());
        buf[ph_start + 8..ph_start + 12].copy_from_slice(&entry.to_le_bytes());
        buf[ph_start + 16..ph_start + 20].copy_from_slice(&(buf.len() as u32).to_le_bytes());
        buf[ph_start + 20..ph_start + 24].copy_from_slice(&(buf.len() as u32).to_le_bytes());
        buf
    }

    #[test]
    fn scenario_one_minimal_32bit_entry_reaches_jump32() {
        let entry_vaddr = 0x10_0000u32;
        let kernel = make_elf32(entry_vaddr);

        let config_text = "[hello]\nbinary=\"/k.elf\"\n";
        let cfg = config::parse(config_text).unwrap();
        let entry = cfg.loadable_entry("hello").unwrap();
        assert_eq!(cfg.get_str(entry.cfg_off, "binary").unwrap(), Some("/k.elf"));

        let mut fs_table = FilesystemTable::new();
        fs_table.register(
            MountSelector::ImplicitBoot,
            MountSelector::ImplicitBoot,
            Box::new(MemFs { kernel }),
        );

        let mock_arch = MockArchJump::default();
        let mut video = NoVideo;
        let env = Environment {
            memory: Box::new(MockMemoryServices::new(Vec::new())),
            filesystems: &fs_table,
            video: &mut video,
            arch: &mock_arch,
            long_mode_available: true,
        };

        let result = catch_unwind(AssertUnwindSafe(|| try_run(config_text, "hello", env)));
        assert!(result.is_err(), "try_run should reach the diverging jump and panic via the mock");

        let recorded = mock_arch.recorded.borrow();
        match *recorded {
            Some(RecordedJump::Jump32(params)) => {
                assert_eq!(params.entrypoint.as_u64(), u64::from(entry_vaddr));
                assert_eq!(params.magic, protocol::ULTRA_MAGIC);
            }
            other => panic!("expected a recorded jump32 call, got {other:?}"),
        }
    }

    #[test]
    fn missing_entry_is_a_fatal_config_error() {
        let config_text = "[hello]\nbinary=\"/k.elf\"\n";
        let fs_table = FilesystemTable::new();
        let mock_arch = MockArchJump::default();
        let mut video = NoVideo;
        let env = Environment {
            memory: Box::new(MockMemoryServices::new(Vec::new())),
            filesystems: &fs_table,
            video: &mut video,
            arch: &mock_arch,
            long_mode_available: true,
        };
        let result = try_run(config_text, "does-not-exist", env);
        assert!(matches!(result, Err(Fatal::ConfigSemantic(ConfigSemanticError::MissingKey { .. }))));
    }
}
