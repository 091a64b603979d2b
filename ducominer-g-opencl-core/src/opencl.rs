//! OpenCL 设备
//!
//! 每个乒乓槽位有独立的 found_flag / found_nonce 设备缓冲区，
//! 批次 N 映射或拷贝自己的标志时，批次 N+1 可以在另一个槽位上清零并运行。

use crate::kernel::{KERNEL_NAME, KERNEL_SOURCE, MESSAGE_CAPACITY};
use crate::queue::{BatchOutcome, BatchRequest, ComputeQueue, RetrievalMode};
use ducominer_core::types::DIGEST_LEN;
use ducominer_core::{DeviceCapabilities, DeviceError};
use ocl::enums::{DeviceInfo, DeviceInfoResult};
use ocl::{flags, Buffer, Context, Device, Event, FutureMemMap, Kernel, Platform, Program, Queue};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const ARG_BASE_LEN: u32 = 1;
const ARG_START_NONCE: u32 = 2;
const ARG_NONCE_COUNT: u32 = 3;
const ARG_FOUND_NONCE: u32 = 5;
const ARG_FOUND_FLAG: u32 = 6;

fn communication(operation: &'static str) -> impl Fn(ocl::Error) -> DeviceError {
    move |err| DeviceError::communication_error(format!("{}: {}", operation, err))
}

/// 列出所有平台上的 GPU 设备
pub fn list_gpu_devices() -> Result<Vec<(Platform, Device)>, DeviceError> {
    let mut devices = Vec::new();
    for platform in Platform::list() {
        match Device::list(platform, Some(flags::DEVICE_TYPE_GPU)) {
            Ok(found) => devices.extend(found.into_iter().map(|device| (platform, device))),
            Err(e) => debug!("Skipping OpenCL platform: {}", e),
        }
    }

    if devices.is_empty() {
        return Err(DeviceError::NoDevices {
            message: "no OpenCL GPU devices were reported by any platform".to_string(),
        });
    }
    Ok(devices)
}

/// 设备描述: `[索引] 名称 (平台)`
pub fn describe_devices() -> Result<Vec<String>, DeviceError> {
    Ok(list_gpu_devices()?
        .iter()
        .enumerate()
        .map(|(index, (platform, device))| {
            format!(
                "[{}] {} ({})",
                index,
                device.name().unwrap_or_else(|_| "unknown".into()),
                platform.name().unwrap_or_else(|_| "unknown platform".into())
            )
        })
        .collect())
}

enum Retrieval {
    Mapped(FutureMemMap<i32>),
    Copied(Event),
}

/// OpenCL 在途批次
pub struct OpenClInFlight {
    slot: usize,
    kernel_event: Event,
    retrieval: Retrieval,
}

/// OpenCL GPU 设备
pub struct OpenClDevice {
    name: String,
    capabilities: DeviceCapabilities,
    queue: Queue,
    kernel: Kernel,
    base_buffer: Buffer<u8>,
    expected_buffer: Buffer<u8>,
    nonce_buffers: [Buffer<u32>; 2],
    flag_buffers: [Buffer<i32>; 2],
    host_flags: [Vec<i32>; 2],
}

impl OpenClDevice {
    /// 打开指定索引的 GPU，创建上下文、队列并编译内核
    pub fn open(index: usize) -> Result<Self, DeviceError> {
        let devices = list_gpu_devices()?;
        let available = devices.len();
        let (platform, device) = *devices
            .get(index)
            .ok_or_else(|| DeviceError::not_found(index, available))?;
        let name = device.name().unwrap_or_else(|_| format!("GPU {}", index));

        let context = Context::builder()
            .platform(platform)
            .devices(device)
            .build()
            .map_err(|e| DeviceError::initialization_failed(format!("无法创建 OpenCL 上下文: {}", e)))?;
        let queue = Queue::new(&context, device, None)
            .map_err(|e| DeviceError::initialization_failed(format!("无法创建命令队列: {}", e)))?;
        let program = Program::builder()
            .src(KERNEL_SOURCE)
            .devices(device)
            .build(&context)
            .map_err(|e| DeviceError::program_build(e.to_string()))?;

        let capabilities = read_capabilities(&device)?;

        let base_buffer = Buffer::<u8>::builder()
            .queue(queue.clone())
            .flags(flags::MEM_READ_ONLY)
            .len(MESSAGE_CAPACITY)
            .fill_val(0u8)
            .build()
            .map_err(|e| DeviceError::initialization_failed(e.to_string()))?;
        let expected_buffer = Buffer::<u8>::builder()
            .queue(queue.clone())
            .flags(flags::MEM_READ_ONLY)
            .len(DIGEST_LEN)
            .fill_val(0u8)
            .build()
            .map_err(|e| DeviceError::initialization_failed(e.to_string()))?;
        let nonce_buffers = [new_result_buffer::<u32>(&queue)?, new_result_buffer::<u32>(&queue)?];
        let flag_buffers = [new_result_buffer::<i32>(&queue)?, new_result_buffer::<i32>(&queue)?];

        let kernel = Kernel::builder()
            .program(&program)
            .name(KERNEL_NAME)
            .queue(queue.clone())
            .global_work_size(1)
            .arg(&base_buffer)
            .arg(0u8)
            .arg(0u32)
            .arg(0u32)
            .arg(&expected_buffer)
            .arg(&nonce_buffers[0])
            .arg(&flag_buffers[0])
            .build()
            .map_err(|e| DeviceError::program_build(e.to_string()))?;

        info!("Using OpenCL device [{}] {}", index, name);

        Ok(Self {
            name,
            capabilities,
            queue,
            kernel,
            base_buffer,
            expected_buffer,
            nonce_buffers,
            flag_buffers,
            host_flags: [vec![0i32; 1], vec![0i32; 1]],
        })
    }

    fn try_map_probe(&self) -> ocl::Result<()> {
        let future = unsafe { self.flag_buffers[0].map().read().write().enq_async()? };
        let mut mapped = future.wait()?;
        mapped[0] = 0;
        mapped.unmap().enq()?;
        self.queue.finish()
    }

    fn enqueue_kernel(&mut self, request: &BatchRequest) -> Result<Event, DeviceError> {
        let slot = request.slot % 2;
        let mut fill_event = Event::empty();
        self.flag_buffers[slot]
            .cmd()
            .fill(0i32, None)
            .enew(&mut fill_event)
            .enq()
            .map_err(communication("clear found flag"))?;

        let set_args = communication("set kernel arguments");
        self.kernel
            .set_arg(ARG_START_NONCE, request.start_nonce)
            .map_err(&set_args)?;
        self.kernel
            .set_arg(ARG_NONCE_COUNT, request.nonce_count)
            .map_err(&set_args)?;
        self.kernel
            .set_arg(ARG_FOUND_NONCE, &self.nonce_buffers[slot])
            .map_err(&set_args)?;
        self.kernel
            .set_arg(ARG_FOUND_FLAG, &self.flag_buffers[slot])
            .map_err(&set_args)?;

        let mut kernel_event = Event::empty();
        unsafe {
            self.kernel
                .cmd()
                .global_work_size(request.global_size)
                .local_work_size(request.local_size)
                .ewait(&fill_event)
                .enew(&mut kernel_event)
                .enq()
                .map_err(communication("enqueue kernel"))?;
        }
        Ok(kernel_event)
    }
}

fn new_result_buffer<T: ocl::OclPrm>(queue: &Queue) -> Result<Buffer<T>, DeviceError> {
    Buffer::<T>::builder()
        .queue(queue.clone())
        .flags(flags::MEM_READ_WRITE | flags::MEM_ALLOC_HOST_PTR)
        .len(1)
        .fill_val(T::default())
        .build()
        .map_err(|e| DeviceError::initialization_failed(e.to_string()))
}

fn read_capabilities(device: &Device) -> Result<DeviceCapabilities, DeviceError> {
    let info_err = |e: ocl::Error| DeviceError::initialization_failed(format!("无法读取设备信息: {}", e));

    let max_work_group_size = device.max_wg_size().map_err(info_err)?;
    let max_work_items_dim0 = match device.info(DeviceInfo::MaxWorkItemSizes).map_err(info_err)? {
        DeviceInfoResult::MaxWorkItemSizes(sizes) => sizes.first().copied().unwrap_or(max_work_group_size),
        _ => max_work_group_size,
    };
    let compute_units = match device.info(DeviceInfo::MaxComputeUnits).map_err(info_err)? {
        DeviceInfoResult::MaxComputeUnits(units) => units as usize,
        _ => 1,
    };

    Ok(DeviceCapabilities {
        max_work_group_size,
        max_work_items_dim0,
        compute_units,
    })
}

impl ComputeQueue for OpenClDevice {
    type InFlight = OpenClInFlight;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn probe_retrieval(&mut self) -> RetrievalMode {
        match self.try_map_probe() {
            Ok(()) => RetrievalMode::Mapped,
            Err(e) => {
                warn!("Zero-copy mapping unavailable ({}); using async copies", e);
                if let Err(e) = self.queue.finish() {
                    warn!("Failed to flush queue after map test: {}", e);
                }
                RetrievalMode::Copied
            }
        }
    }

    fn load_job(&mut self, base_message: &[u8], expected: &[u8; DIGEST_LEN]) -> Result<(), DeviceError> {
        if base_message.len() > MESSAGE_CAPACITY - 10 {
            return Err(DeviceError::invalid_configuration(format!(
                "消息长度 {} 超出内核缓冲区",
                base_message.len()
            )));
        }
        let mut padded = [0u8; MESSAGE_CAPACITY];
        padded[..base_message.len()].copy_from_slice(base_message);

        self.base_buffer
            .write(&padded[..])
            .enq()
            .map_err(communication("upload last hash"))?;
        self.expected_buffer
            .write(&expected[..])
            .enq()
            .map_err(communication("upload expected digest"))?;
        self.kernel
            .set_arg(ARG_BASE_LEN, base_message.len() as u8)
            .map_err(communication("set base length"))
    }

    fn dispatch(&mut self, request: &BatchRequest, mode: RetrievalMode) -> Result<Self::InFlight, DeviceError> {
        let slot = request.slot % 2;
        let kernel_event = self.enqueue_kernel(request)?;

        let retrieval = match mode {
            RetrievalMode::Mapped => {
                let future = unsafe {
                    self.flag_buffers[slot]
                        .map()
                        .read()
                        .ewait(&kernel_event)
                        .enq_async()
                        .map_err(communication("map found flag"))?
                };
                Retrieval::Mapped(future)
            }
            RetrievalMode::Copied => {
                let mut copy_event = Event::empty();
                unsafe {
                    self.flag_buffers[slot]
                        .read(&mut self.host_flags[slot][..])
                        .ewait(&kernel_event)
                        .enew(&mut copy_event)
                        .block(false)
                        .enq()
                        .map_err(communication("copy found flag"))?;
                }
                Retrieval::Copied(copy_event)
            }
        };

        Ok(OpenClInFlight {
            slot,
            kernel_event,
            retrieval,
        })
    }

    fn complete(&mut self, in_flight: Self::InFlight) -> Result<BatchOutcome, DeviceError> {
        let OpenClInFlight {
            slot,
            kernel_event,
            retrieval,
        } = in_flight;

        let found = match retrieval {
            Retrieval::Mapped(future) => {
                let mut mapped = future.wait().map_err(communication("wait for mapped flag"))?;
                let flag = mapped[0];
                mapped.unmap().enq().map_err(communication("unmap found flag"))?;
                flag != 0
            }
            Retrieval::Copied(copy_event) => {
                copy_event.wait_for().map_err(communication("wait for flag copy"))?;
                self.host_flags[slot][0] != 0
            }
        };

        if !found {
            return Ok(BatchOutcome::NotFound);
        }

        let mut nonce = [0u32; 1];
        self.nonce_buffers[slot]
            .read(&mut nonce[..])
            .ewait(&kernel_event)
            .enq()
            .map_err(communication("read found nonce"))?;
        Ok(BatchOutcome::Found(nonce[0]))
    }

    fn benchmark(&mut self, request: &BatchRequest) -> Result<Duration, DeviceError> {
        let started = Instant::now();
        self.enqueue_kernel(request)?;
        self.queue.finish().map_err(communication("finish benchmark batch"))?;
        Ok(started.elapsed())
    }
}
