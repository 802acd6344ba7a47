//! 内蔵フラッシュ上の校正レコード領域
//!
//! STM32G431VBのフラッシュ末尾10KB（0x0801D800〜）を使用します。
//! 書き込みは2KBページ単位の読み出し・変更・書き戻しで行い、
//! 直近のページをRAMにキャッシュして `flush()` またはページ切り替え時に反映します。

use embassy_stm32::flash::{Blocking, Flash};
use foc_engine::config::storage::REGION_SIZE;
use foc_engine::{Storage, StorageError};

use crate::fmt::*;

/// フラッシュページサイズ（2KB）
pub const FLASH_PAGE_SIZE: usize = 2048;

/// 領域先頭のフラッシュ先頭からのオフセット（0x0801D800）
pub const REGION_OFFSET: u32 = 0x1D800;

/// ページキャッシュ
struct PageCache {
    page: usize,
    data: [u8; FLASH_PAGE_SIZE],
    dirty: bool,
}

pub struct FlashStorage {
    flash: Flash<'static, Blocking>,
    cache: Option<PageCache>,
    initialized: bool,
}

impl FlashStorage {
    pub fn new(flash: Flash<'static, Blocking>) -> Self {
        Self {
            flash,
            cache: None,
            initialized: false,
        }
    }

    fn page_offset(page: usize) -> u32 {
        REGION_OFFSET + (page * FLASH_PAGE_SIZE) as u32
    }

    /// 対象ページをキャッシュに載せる（別ページが汚れていれば先に書き戻す）
    fn load_page(&mut self, page: usize) -> Result<&mut PageCache, StorageError> {
        if self.cache.as_ref().is_some_and(|c| c.page != page) {
            self.flush()?;
            self.cache = None;
        }
        if self.cache.is_none() {
            let mut data = [0xFF; FLASH_PAGE_SIZE];
            self.flash
                .blocking_read(Self::page_offset(page), &mut data)
                .map_err(|e| {
                    error!("Flash read failed: {:?}", e);
                    StorageError::Read
                })?;
            self.cache = Some(PageCache {
                page,
                data,
                dirty: false,
            });
        }
        self.cache.as_mut().ok_or(StorageError::Read)
    }
}

fn check_range(address: usize, len: usize) -> Result<(), StorageError> {
    match address.checked_add(len) {
        Some(end) if end <= REGION_SIZE => Ok(()),
        _ => Err(StorageError::OutOfRange),
    }
}

impl Storage for FlashStorage {
    fn init(&mut self) -> Result<(), StorageError> {
        self.cache = None;
        self.initialized = true;
        info!(
            "Flash storage at offset 0x{:05X}, {} bytes",
            REGION_OFFSET, REGION_SIZE
        );
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn read(&mut self, address: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        check_range(address, buf.len())?;
        let mut done = 0;
        while done < buf.len() {
            let at = address + done;
            let (page, offset) = (at / FLASH_PAGE_SIZE, at % FLASH_PAGE_SIZE);
            let len = (FLASH_PAGE_SIZE - offset).min(buf.len() - done);
            let chunk = &mut buf[done..done + len];

            match self.cache.as_ref() {
                Some(cache) if cache.page == page => {
                    chunk.copy_from_slice(&cache.data[offset..offset + len])
                }
                _ => self
                    .flash
                    .blocking_read(Self::page_offset(page) + offset as u32, chunk)
                    .map_err(|e| {
                        error!("Flash read failed: {:?}", e);
                        StorageError::Read
                    })?,
            }
            done += len;
        }
        Ok(())
    }

    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), StorageError> {
        check_range(address, data.len())?;
        let mut done = 0;
        while done < data.len() {
            let at = address + done;
            let (page, offset) = (at / FLASH_PAGE_SIZE, at % FLASH_PAGE_SIZE);
            let len = (FLASH_PAGE_SIZE - offset).min(data.len() - done);

            let cache = self.load_page(page)?;
            cache.data[offset..offset + len].copy_from_slice(&data[done..done + len]);
            cache.dirty = true;
            done += len;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        let Some(cache) = self.cache.as_mut().filter(|c| c.dirty) else {
            return Ok(());
        };
        let start = Self::page_offset(cache.page);

        debug!("Erasing flash page at offset 0x{:05X}", start);
        self.flash
            .blocking_erase(start, start + FLASH_PAGE_SIZE as u32)
            .map_err(|e| {
                error!("Flash erase failed: {:?}", e);
                StorageError::Write
            })?;
        self.flash.blocking_write(start, &cache.data).map_err(|e| {
            error!("Flash write failed: {:?}", e);
            StorageError::Write
        })?;
        cache.dirty = false;
        Ok(())
    }
}
