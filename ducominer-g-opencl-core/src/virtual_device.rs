//! 虚拟计算设备
//!
//! 在主机线程上执行内核约定：命令按提交顺序执行，完成通过通道异步通知，
//! 行为与 OpenCL 有序队列一致。用于无 GPU 环境下的演练和测试。

use crate::kernel::{host_digest, MESSAGE_CAPACITY};
use crate::queue::{BatchOutcome, BatchRequest, ComputeQueue, RetrievalMode};
use ducominer_core::ducos1::{write_decimal, MAX_NONCE_DIGITS};
use ducominer_core::types::DIGEST_LEN;
use ducominer_core::{DeviceCapabilities, DeviceError};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::debug;

enum Command {
    Load {
        base_message: Vec<u8>,
        expected: [u8; DIGEST_LEN],
    },
    Run {
        request: BatchRequest,
        done: mpsc::Sender<BatchOutcome>,
    },
}

/// 虚拟设备的在途批次
pub struct VirtualInFlight {
    slot: usize,
    done: mpsc::Receiver<BatchOutcome>,
}

/// 主机线程上的有序命令队列
pub struct VirtualDevice {
    name: String,
    capabilities: DeviceCapabilities,
    supports_mapping: bool,
    commands: Option<mpsc::Sender<Command>>,
    executor: Option<JoinHandle<()>>,
    /// 每个槽位最多一个在途批次
    slots_busy: [bool; 2],
}

impl VirtualDevice {
    /// 创建虚拟设备并启动执行线程
    pub fn new(capabilities: DeviceCapabilities, supports_mapping: bool) -> Result<Self, DeviceError> {
        let (tx, rx) = mpsc::channel();
        let executor = std::thread::Builder::new()
            .name("virtual-gpu".to_string())
            .spawn(move || execute_commands(rx))
            .map_err(|e| DeviceError::initialization_failed(format!("无法启动虚拟设备线程: {}", e)))?;

        Ok(Self {
            name: format!("virtual ({} CU)", capabilities.compute_units),
            capabilities,
            supports_mapping,
            commands: Some(tx),
            executor: Some(executor),
            slots_busy: [false; 2],
        })
    }

    /// 小规格设备，便于测试覆盖多批次
    pub fn small() -> Result<Self, DeviceError> {
        Self::new(
            DeviceCapabilities {
                max_work_group_size: 64,
                max_work_items_dim0: 64,
                compute_units: 2,
            },
            true,
        )
    }

    fn send(&self, command: Command) -> Result<(), DeviceError> {
        self.commands
            .as_ref()
            .ok_or_else(|| DeviceError::communication_error("虚拟设备已关闭"))?
            .send(command)
            .map_err(|_| DeviceError::communication_error("虚拟设备执行线程已退出"))
    }
}

impl ComputeQueue for VirtualDevice {
    type InFlight = VirtualInFlight;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn probe_retrieval(&mut self) -> RetrievalMode {
        if self.supports_mapping {
            RetrievalMode::Mapped
        } else {
            RetrievalMode::Copied
        }
    }

    fn load_job(&mut self, base_message: &[u8], expected: &[u8; DIGEST_LEN]) -> Result<(), DeviceError> {
        if base_message.len() + MAX_NONCE_DIGITS > MESSAGE_CAPACITY {
            return Err(DeviceError::invalid_configuration(format!(
                "消息长度 {} 超出内核缓冲区",
                base_message.len()
            )));
        }
        self.send(Command::Load {
            base_message: base_message.to_vec(),
            expected: *expected,
        })
    }

    fn dispatch(&mut self, request: &BatchRequest, mode: RetrievalMode) -> Result<Self::InFlight, DeviceError> {
        let slot = request.slot % 2;
        if self.slots_busy[slot] {
            return Err(DeviceError::communication_error(format!("槽位 {} 仍有在途批次", slot)));
        }
        let (done, rx) = mpsc::channel();
        self.send(Command::Run {
            request: *request,
            done,
        })?;
        self.slots_busy[slot] = true;
        debug!("virtual dispatch start={} count={} via {}", request.start_nonce, request.nonce_count, mode);
        Ok(VirtualInFlight { slot, done: rx })
    }

    fn complete(&mut self, in_flight: Self::InFlight) -> Result<BatchOutcome, DeviceError> {
        let outcome = in_flight
            .done
            .recv()
            .map_err(|_| DeviceError::communication_error("虚拟设备未返回批次结果"));
        self.slots_busy[in_flight.slot] = false;
        outcome
    }

    fn benchmark(&mut self, request: &BatchRequest) -> Result<Duration, DeviceError> {
        let started = Instant::now();
        let in_flight = self.dispatch(request, RetrievalMode::Copied)?;
        self.complete(in_flight)?;
        Ok(started.elapsed())
    }
}

impl Drop for VirtualDevice {
    fn drop(&mut self) {
        self.commands.take();
        if let Some(executor) = self.executor.take() {
            let _ = executor.join();
        }
    }
}

fn execute_commands(commands: mpsc::Receiver<Command>) {
    let mut base_message = Vec::new();
    let mut expected = [0u8; DIGEST_LEN];

    while let Ok(command) = commands.recv() {
        match command {
            Command::Load {
                base_message: message,
                expected: digest,
            } => {
                base_message = message;
                expected = digest;
            }
            Command::Run { request, done } => {
                let outcome = run_kernel(&base_message, &expected, &request);
                // 接收端已丢弃说明调用方放弃了该批次
                let _ = done.send(outcome);
            }
        }
    }
}

/// 按内核约定执行一个批次：超出 nonce_count 的工作项直接返回，首个命中者写入结果
fn run_kernel(base_message: &[u8], expected: &[u8; DIGEST_LEN], request: &BatchRequest) -> BatchOutcome {
    let mut message = [0u8; MESSAGE_CAPACITY];
    message[..base_message.len()].copy_from_slice(base_message);
    let mut digits = [0u8; MAX_NONCE_DIGITS];

    for gid in 0..request.global_size.min(request.nonce_count as usize) {
        let nonce = request.start_nonce.wrapping_add(gid as u32);
        let suffix = write_decimal(nonce, &mut digits);
        let len = base_message.len() + suffix.len();
        message[base_message.len()..len].copy_from_slice(suffix);
        if host_digest(&message[..len]) == *expected {
            return BatchOutcome::Found(nonce);
        }
    }
    BatchOutcome::NotFound
}
