//! ATT server of the local configuration service
//!
//! Answers one request at a time against the fixed [`AttributeTable`].
//! Dynamic attributes are backed by the bridge configuration, the key
//! store and the [`Platform`].
use super::constants::*;
use super::error::{AttError, AttErrorCode, ErrorRsp};
use super::pdu::{AttRequest, AttResponse};
use super::table::{AttPerms, AttrValue, Attribute, AttributeTable, Resource};
use crate::config::{BridgeConfig, InputConfig, MAX_INPUTS, MAX_OUTPUTS};
use crate::gap::BdAddr;
use crate::hid::Platform;
use crate::keystore::KeyStore;
use crate::storage::Storage;
use crate::uuid::{Uuid, PRIMARY_SERVICE_UUID16};
use log::{debug, info, warn};

/// Version of the configuration API exposed at the first characteristic
pub const API_VERSION: u8 = 0x01;

// Command characteristic opcodes
pub const CMD_REBOOT: u8 = 0x01;
pub const CMD_FACTORY_RESET: u8 = 0x02;
pub const CMD_SLEEP: u8 = 0x03;
pub const CMD_OTA_BEGIN: u8 = 0x10;
pub const CMD_OTA_END: u8 = 0x11;
pub const CMD_OTA_ABORT: u8 = 0x12;
pub const CMD_DIR_OPEN: u8 = 0x20;

#[derive(Debug, Clone, PartialEq, Eq)]
struct PrepareWriteRequest {
    handle: u16,
    offset: u16,
    value: Vec<u8>,
}

/// Per connection server state
#[derive(Debug, Clone)]
pub struct AttSession {
    pub mtu: u16,
    prepare_queue: Vec<PrepareWriteRequest>,
    pub service_changed_cccd: u16,
    pub out_index: usize,
    pub in_index: usize,
    /// Start of the window `InputData` reads and writes address
    pub in_offset: usize,
    pub mc_offset: usize,
}

impl Default for AttSession {
    fn default() -> Self {
        Self {
            mtu: ATT_DEFAULT_MTU,
            prepare_queue: Vec::new(),
            service_changed_cccd: 0,
            out_index: 0,
            in_index: 0,
            in_offset: 0,
            mc_offset: 0,
        }
    }
}

impl AttSession {
    pub fn prepared_writes(&self) -> usize {
        self.prepare_queue.len()
    }
}

/// State the server reads and mutates while answering a request
pub struct AttContext<'a> {
    pub config: &'a mut BridgeConfig,
    pub storage: &'a dyn Storage,
    pub keys: &'a mut KeyStore,
    pub platform: &'a dyn Platform,
    pub local_addr: BdAddr,
}

type ServerResult<T> = Result<T, AttErrorCode>;

/// ATT Server
#[derive(Debug, Clone)]
pub struct AttServer {
    table: AttributeTable,
    local_mtu: u16,
}

impl AttServer {
    pub fn new(device_name: &str, local_mtu: u16) -> Self {
        Self {
            table: AttributeTable::new(device_name),
            local_mtu: local_mtu.max(ATT_DEFAULT_MTU),
        }
    }

    pub fn table(&self) -> &AttributeTable {
        &self.table
    }

    /// Answers one client PDU. `None` for commands, confirmations and
    /// anything else that takes no response.
    pub fn handle_att_pdu(
        &self,
        att: &mut AttSession,
        ctx: &mut AttContext<'_>,
        data: &[u8],
    ) -> Option<Vec<u8>> {
        let opcode = *data.first()?;
        let request = match AttRequest::parse(data) {
            Ok(request) => request,
            Err(AttError::UnsupportedOpcode(op)) => {
                if op & ATT_COMMAND_FLAG != 0 {
                    debug!("ignoring ATT command 0x{:02x}", op);
                    return None;
                }
                return Some(error_pdu(op, 0, AttErrorCode::RequestNotSupported));
            }
            Err(e) => {
                warn!("malformed ATT request: {}", e);
                if opcode & ATT_COMMAND_FLAG != 0 {
                    return None;
                }
                return Some(error_pdu(opcode, 0, AttErrorCode::InvalidPdu));
            }
        };

        let handle = request.handle();
        let result = match request {
            AttRequest::ExchangeMtu { mtu } => Ok(Some(self.handle_exchange_mtu_request(att, mtu))),
            AttRequest::FindInformation { start, end } => self
                .handle_find_information_request(att, start, end)
                .map(Some)
                .map_err(|code| ErrorRsp::new(opcode, start, code)),
            AttRequest::FindByTypeValue { start, .. } => Err(ErrorRsp::new(
                opcode,
                start,
                AttErrorCode::AttributeNotFound,
            )),
            AttRequest::ReadByType {
                start,
                end,
                attr_type,
            } => self
                .handle_read_by_type_request(att, ctx, start, end, &attr_type)
                .map(Some)
                .map_err(|code| ErrorRsp::new(opcode, start, code)),
            AttRequest::Read { handle } => self
                .handle_read_request(att, ctx, handle, 0)
                .map(|value| Some(AttResponse::Read(value)))
                .map_err(|code| ErrorRsp::new(opcode, handle, code)),
            AttRequest::ReadBlob { handle, offset } => self
                .handle_read_request(att, ctx, handle, offset as usize)
                .map(|value| Some(AttResponse::ReadBlob(value)))
                .map_err(|code| ErrorRsp::new(opcode, handle, code)),
            AttRequest::ReadByGroupType {
                start,
                end,
                group_type,
            } => self
                .handle_read_by_group_type_request(att, start, end, &group_type)
                .map(Some)
                .map_err(|code| ErrorRsp::new(opcode, start, code)),
            AttRequest::Write { handle, value } => self
                .handle_write_request(att, ctx, handle, 0, &value)
                .map(|_| Some(AttResponse::Write))
                .map_err(|code| ErrorRsp::new(opcode, handle, code)),
            AttRequest::WriteCommand { handle, value } => {
                if let Err(code) = self.handle_write_request(att, ctx, handle, 0, &value) {
                    debug!("write command to 0x{:04x} dropped: {:?}", handle, code);
                }
                Ok(None)
            }
            AttRequest::PrepareWrite {
                handle,
                offset,
                value,
            } => self
                .handle_prepare_write_request(att, handle, offset, value)
                .map(Some)
                .map_err(|code| ErrorRsp::new(opcode, handle, code)),
            AttRequest::ExecuteWrite { commit } => self
                .handle_execute_write_request(att, ctx, commit)
                .map(|_| Some(AttResponse::ExecuteWrite))
                .map_err(|(handle, code)| ErrorRsp::new(opcode, handle, code)),
            AttRequest::HandleValueConfirmation => Ok(None),
        };

        match result {
            Ok(response) => response.map(|r| r.serialize()),
            Err(rsp) => {
                debug!(
                    "ATT 0x{:02x} on 0x{:04x} failed: {:?}",
                    rsp.request_opcode, handle, rsp.code
                );
                Some(AttResponse::Error(rsp).serialize())
            }
        }
    }

    fn handle_exchange_mtu_request(&self, att: &mut AttSession, client_mtu: u16) -> AttResponse {
        att.mtu = client_mtu.min(self.local_mtu).max(ATT_DEFAULT_MTU);
        debug!("ATT MTU negotiated to {}", att.mtu);
        AttResponse::ExchangeMtu {
            mtu: self.local_mtu,
        }
    }

    fn handle_find_information_request(
        &self,
        att: &AttSession,
        start: u16,
        end: u16,
    ) -> ServerResult<AttResponse> {
        check_range(start, end)?;
        let mut entries: Vec<(u16, Uuid)> = Vec::new();
        let mut used = 2;
        for attr in self.table.range(start, end) {
            let len = attr.attr_type.att_len();
            if let Some((_, first)) = entries.first() {
                if first.att_len() != len {
                    break;
                }
            }
            if used + 2 + len > att.mtu as usize {
                break;
            }
            used += 2 + len;
            entries.push((attr.handle, attr.attr_type));
        }
        if entries.is_empty() {
            return Err(AttErrorCode::AttributeNotFound);
        }
        Ok(AttResponse::FindInformation(entries))
    }

    fn handle_read_by_type_request(
        &self,
        att: &AttSession,
        ctx: &AttContext<'_>,
        start: u16,
        end: u16,
        attr_type: &Uuid,
    ) -> ServerResult<AttResponse> {
        check_range(start, end)?;
        // length byte of each entry must fit
        let max_value = (att.mtu as usize - 4).min(253);
        let mut entries: Vec<(u16, Vec<u8>)> = Vec::new();
        let mut used = 2;
        for attr in self.table.range(start, end).filter(|a| a.attr_type == *attr_type) {
            let value = match self.read_value(att, ctx, attr, 0, max_value) {
                Ok(value) => value,
                Err(code) if entries.is_empty() => return Err(code),
                Err(_) => break,
            };
            if let Some((_, first)) = entries.first() {
                if first.len() != value.len() {
                    break;
                }
            }
            if used + 2 + value.len() > att.mtu as usize {
                break;
            }
            used += 2 + value.len();
            entries.push((attr.handle, value));
        }
        if entries.is_empty() {
            return Err(AttErrorCode::AttributeNotFound);
        }
        Ok(AttResponse::ReadByType(entries))
    }

    fn handle_read_request(
        &self,
        att: &AttSession,
        ctx: &AttContext<'_>,
        handle: u16,
        offset: usize,
    ) -> ServerResult<Vec<u8>> {
        let attr = self.table.get(handle).ok_or(AttErrorCode::InvalidHandle)?;
        self.read_value(att, ctx, attr, offset, att.mtu as usize - 1)
    }

    fn handle_read_by_group_type_request(
        &self,
        att: &AttSession,
        start: u16,
        end: u16,
        group_type: &Uuid,
    ) -> ServerResult<AttResponse> {
        check_range(start, end)?;
        if *group_type != PRIMARY_SERVICE_UUID16 {
            return Err(AttErrorCode::UnsupportedGroupType);
        }
        let mut entries: Vec<(u16, u16, Vec<u8>)> = Vec::new();
        let mut used = 2;
        for attr in self.table.range(start, end).filter(|a| a.is_primary_service()) {
            let AttrValue::Fixed(value) = &attr.value else {
                continue;
            };
            if let Some((_, _, first)) = entries.first() {
                if first.len() != value.len() {
                    break;
                }
            }
            if used + 4 + value.len() > att.mtu as usize {
                break;
            }
            used += 4 + value.len();
            entries.push((attr.handle, self.table.group_end(attr.handle), value.clone()));
        }
        if entries.is_empty() {
            return Err(AttErrorCode::AttributeNotFound);
        }
        Ok(AttResponse::ReadByGroupType(entries))
    }

    fn handle_write_request(
        &self,
        att: &mut AttSession,
        ctx: &mut AttContext<'_>,
        handle: u16,
        offset: usize,
        value: &[u8],
    ) -> ServerResult<()> {
        let attr = self.table.get(handle).ok_or(AttErrorCode::InvalidHandle)?;
        if !attr.perms.contains(AttPerms::WRITE) {
            return Err(AttErrorCode::WriteNotPermitted);
        }
        match attr.value {
            AttrValue::Fixed(_) => Err(AttErrorCode::WriteNotPermitted),
            AttrValue::Dynamic(resource) => write_resource(att, ctx, resource, offset, value),
        }
    }

    fn handle_prepare_write_request(
        &self,
        att: &mut AttSession,
        handle: u16,
        offset: u16,
        value: Vec<u8>,
    ) -> ServerResult<AttResponse> {
        let attr = self.table.get(handle).ok_or(AttErrorCode::InvalidHandle)?;
        if !attr.perms.contains(AttPerms::WRITE) {
            return Err(AttErrorCode::WriteNotPermitted);
        }
        if att.prepare_queue.len() >= ATT_PREPARE_WRITE_QUEUE_SIZE {
            return Err(AttErrorCode::PrepareQueueFull);
        }
        att.prepare_queue.push(PrepareWriteRequest {
            handle,
            offset,
            value: value.clone(),
        });
        Ok(AttResponse::PrepareWrite {
            handle,
            offset,
            value,
        })
    }

    fn handle_execute_write_request(
        &self,
        att: &mut AttSession,
        ctx: &mut AttContext<'_>,
        commit: bool,
    ) -> Result<(), (u16, AttErrorCode)> {
        let queue = std::mem::take(&mut att.prepare_queue);
        if !commit {
            debug!("cancelled {} prepared writes", queue.len());
            return Ok(());
        }
        for write in queue {
            self.handle_write_request(att, ctx, write.handle, write.offset as usize, &write.value)
                .map_err(|code| (write.handle, code))?;
        }
        Ok(())
    }

    fn read_value(
        &self,
        att: &AttSession,
        ctx: &AttContext<'_>,
        attr: &Attribute,
        offset: usize,
        max: usize,
    ) -> ServerResult<Vec<u8>> {
        if !attr.perms.contains(AttPerms::READ) {
            return Err(AttErrorCode::ReadNotPermitted);
        }
        match &attr.value {
            AttrValue::Fixed(value) => window(value, offset, max),
            AttrValue::Dynamic(Resource::McData) => {
                let size = ctx.platform.mc_size();
                let start = att.mc_offset + offset;
                if start > size {
                    return Err(AttErrorCode::InvalidOffset);
                }
                let mut buf = vec![0u8; max.min(size - start)];
                let n = ctx.platform.mc_read(start, &mut buf);
                buf.truncate(n);
                Ok(buf)
            }
            AttrValue::Dynamic(Resource::Command) => {
                // each read pulls the next entry of the open listing
                if offset > 0 {
                    return Ok(Vec::new());
                }
                let entry = ctx.platform.next_dir_entry().unwrap_or_default();
                window(entry.as_bytes(), 0, max)
            }
            AttrValue::Dynamic(resource) => {
                window(&resource_bytes(att, ctx, *resource), offset, max)
            }
        }
    }
}

fn check_range(start: u16, end: u16) -> ServerResult<()> {
    if start == 0 || start > end {
        return Err(AttErrorCode::InvalidHandle);
    }
    Ok(())
}

fn error_pdu(opcode: u8, handle: u16, code: AttErrorCode) -> Vec<u8> {
    AttResponse::Error(ErrorRsp::new(opcode, handle, code)).serialize()
}

/// At most `max` bytes of `value` starting at `offset`
fn window(value: &[u8], offset: usize, max: usize) -> ServerResult<Vec<u8>> {
    if offset > value.len() {
        return Err(AttErrorCode::InvalidOffset);
    }
    let end = value.len().min(offset + max);
    Ok(value[offset..end].to_vec())
}

/// Current serialized value of a resource
fn resource_bytes(att: &AttSession, ctx: &AttContext<'_>, resource: Resource) -> Vec<u8> {
    match resource {
        Resource::BatteryLevel => vec![ctx.platform.battery_level()],
        Resource::ServiceChangedCccd => att.service_changed_cccd.to_le_bytes().to_vec(),
        Resource::ApiVersion => vec![API_VERSION],
        Resource::GlobalConfig => ctx.config.global.to_bytes().to_vec(),
        Resource::OutputControl => vec![att.out_index as u8],
        Resource::OutputData => ctx.config.outputs[att.out_index].to_bytes().to_vec(),
        Resource::InputControl => {
            let mut out = vec![att.in_index as u8];
            out.extend_from_slice(&(att.in_offset as u16).to_le_bytes());
            out
        }
        Resource::InputData => ctx
            .config
            .inputs
            .get(att.in_index)
            .map(|input| input.to_bytes().split_off(att.in_offset.min(InputConfig::LEN)))
            .unwrap_or_default(),
        Resource::FirmwareName => ctx.platform.firmware_name().into_bytes(),
        Resource::BdAddr => ctx.local_addr.bytes.to_vec(),
        Resource::McControl => (att.mc_offset as u32).to_le_bytes().to_vec(),
        Resource::OtaData | Resource::McData | Resource::Command => Vec::new(),
    }
}

/// `current` with `data` laid over it at `offset`
fn overlay(current: &[u8], offset: usize, data: &[u8]) -> ServerResult<Vec<u8>> {
    if offset > current.len() {
        return Err(AttErrorCode::InvalidOffset);
    }
    let mut bytes = current.to_vec();
    let end = current.len().min(offset + data.len());
    bytes[offset..end].copy_from_slice(&data[..end - offset]);
    Ok(bytes)
}

fn write_resource(
    att: &mut AttSession,
    ctx: &mut AttContext<'_>,
    resource: Resource,
    offset: usize,
    value: &[u8],
) -> ServerResult<()> {
    match resource {
        Resource::ServiceChangedCccd => {
            let bytes = overlay(&att.service_changed_cccd.to_le_bytes(), offset, value)?;
            att.service_changed_cccd = u16::from_le_bytes([bytes[0], bytes[1]]);
        }
        Resource::GlobalConfig => {
            let bytes = overlay(&ctx.config.global.to_bytes(), offset, value)?;
            ctx.config.global.update_from(&bytes);
            ctx.config.save(ctx.storage);
        }
        Resource::OutputControl => {
            let index = *value.first().ok_or(AttErrorCode::InvalidAttributeValueLength)?;
            att.out_index = (index as usize).min(MAX_OUTPUTS - 1);
        }
        Resource::OutputData => {
            let output = &mut ctx.config.outputs[att.out_index];
            let bytes = overlay(&output.to_bytes(), offset, value)?;
            output.update_from(&bytes);
            ctx.config.save(ctx.storage);
        }
        Resource::InputControl => {
            let index = *value.first().ok_or(AttErrorCode::InvalidAttributeValueLength)?;
            att.in_index = (index as usize).min(MAX_INPUTS - 1);
            att.in_offset = match value.get(1..3) {
                Some(raw) => (u16::from_le_bytes([raw[0], raw[1]]) as usize).min(InputConfig::LEN),
                None => 0,
            };
        }
        Resource::InputData => {
            let start = att.in_offset + offset;
            if start > InputConfig::LEN {
                return Err(AttErrorCode::InvalidOffset);
            }
            let input = ctx
                .config
                .inputs
                .get_mut(att.in_index)
                .ok_or(AttErrorCode::Unlikely)?;
            input.write_at(start, value);
            ctx.config.save(ctx.storage);
        }
        Resource::OtaData => {
            if !ctx.platform.ota_write(value) {
                warn!("OTA chunk of {} bytes rejected", value.len());
                return Err(AttErrorCode::Unlikely);
            }
        }
        Resource::McControl => {
            let raw = value.get(..4).ok_or(AttErrorCode::InvalidAttributeValueLength)?;
            let requested = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
            att.mc_offset = requested.min(ctx.platform.mc_size());
        }
        Resource::McData => {
            let start = att.mc_offset + offset;
            if start > ctx.platform.mc_size() {
                return Err(AttErrorCode::InvalidOffset);
            }
            ctx.platform.mc_write(start, value);
        }
        Resource::Command => {
            let cmd = *value.first().ok_or(AttErrorCode::InvalidAttributeValueLength)?;
            run_command(ctx, cmd);
        }
        Resource::BatteryLevel
        | Resource::ApiVersion
        | Resource::FirmwareName
        | Resource::BdAddr => return Err(AttErrorCode::WriteNotPermitted),
    }
    Ok(())
}

/// Command writes are always acknowledged; failures are only logged.
fn run_command(ctx: &mut AttContext<'_>, cmd: u8) {
    info!("configuration command 0x{:02x}", cmd);
    match cmd {
        CMD_REBOOT => ctx.platform.reboot(),
        CMD_FACTORY_RESET => {
            *ctx.config = BridgeConfig::default();
            ctx.config.save(ctx.storage);
            ctx.keys.clear_all();
            ctx.platform.factory_reset();
        }
        CMD_SLEEP => ctx.platform.sleep(),
        CMD_OTA_BEGIN => {
            if !ctx.platform.ota_begin() {
                warn!("OTA begin refused");
            }
        }
        CMD_OTA_END => {
            if !ctx.platform.ota_end() {
                warn!("OTA image rejected");
            }
        }
        CMD_OTA_ABORT => ctx.platform.ota_abort(),
        CMD_DIR_OPEN => ctx.platform.dir_open(),
        other => warn!("unknown configuration command 0x{:02x}", other),
    }
}
