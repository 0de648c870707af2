use std::fmt::Display;

use ash::vk;
use culvis_gfx::{
    GfxResult,
    device::GfxDevice,
    resources::{
        buffer::{GfxBuffer, GfxBufferDesc},
        image::GfxImage,
    },
};

use crate::gpu_types::CULL_DATA_ALIGN;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameLabel {
    A,
    B,
    C,
}
impl Display for FrameLabel {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::C => write!(f, "C"),
        }
    }
}
impl FrameLabel {
    #[inline]
    pub fn from_usize(idx: usize) -> Self {
        match idx {
            0 => Self::A,
            1 => Self::B,
            2 => Self::C,
            _ => panic!("Invalid frame index: {idx}"),
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
}
// new & init
impl FrameCounter {
    pub fn new(init_frame_id: u64) -> Self {
        Self { frame_id: init_frame_id }
    }
}
// update
impl FrameCounter {
    #[inline]
    pub fn next_frame(&mut self) {
        self.frame_id = self.frame_id.wrapping_add(1);
    }
}
// getters
impl FrameCounter {
    const FIF_COUNT: usize = 3;
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
    #[inline]
    pub const fn fif_count() -> usize {
        Self::FIF_COUNT
    }
    #[inline]
    pub const fn frame_labels() -> [FrameLabel; Self::FIF_COUNT] {
        [FrameLabel::A, FrameLabel::B, FrameLabel::C]
    }
    #[inline]
    pub fn frame_label(&self) -> FrameLabel {
        FrameLabel::from_usize(self.frame_id as usize % Self::fif_count())
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, self.frame_label())
    }
}

/// 延迟到 frame slot 复用时才销毁的资源
#[derive(Default)]
pub struct DeletionQueue {
    buffers: Vec<GfxBuffer>,
    images: Vec<GfxImage>,
    views: Vec<vk::ImageView>,
}

impl DeletionQueue {
    #[inline]
    pub fn retire_buffer(&mut self, buffer: GfxBuffer) {
        self.buffers.push(buffer);
    }

    #[inline]
    pub fn retire_image(&mut self, image: GfxImage, views: impl IntoIterator<Item = vk::ImageView>) {
        self.images.push(image);
        self.views.extend(views);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffers.len() + self.images.len() + self.views.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flush(&mut self, device: &dyn GfxDevice) {
        for view in self.views.drain(..) {
            device.destroy_image_view(view);
        }
        for image in self.images.drain(..) {
            device.destroy_image(image);
        }
        for buffer in self.buffers.drain(..) {
            device.destroy_buffer(buffer);
        }
    }
}

/// 一个 frame slot 独占的资源
pub struct FrameResources {
    label: FrameLabel,
    fence: vk::Fence,
    /// 每个 pass 一段 `CULL_DATA_ALIGN` 大小的 GpuCullData
    cull_data: GfxBuffer,
    deletion_queue: DeletionQueue,
}

// new & init
impl FrameResources {
    pub fn new(device: &dyn GfxDevice, label: FrameLabel, pass_count: usize) -> GfxResult<Self> {
        let cull_data = device
            .create_buffer(&GfxBufferDesc::uniform(CULL_DATA_ALIGN * pass_count as u64, format!("cull-data-{}", label)))?;
        Ok(Self {
            label,
            // 初始为 signaled，第一次 begin_frame 不会阻塞
            fence: device.create_fence(true)?,
            cull_data,
            deletion_queue: DeletionQueue::default(),
        })
    }

    pub fn destroy(mut self, device: &dyn GfxDevice) {
        self.deletion_queue.flush(device);
        device.destroy_buffer(self.cull_data);
        device.destroy_fence(self.fence);
    }
}

// getter
impl FrameResources {
    #[inline]
    pub fn label(&self) -> FrameLabel {
        self.label
    }

    #[inline]
    pub fn fence(&self) -> vk::Fence {
        self.fence
    }

    #[inline]
    pub fn cull_data(&self) -> &GfxBuffer {
        &self.cull_data
    }

    #[inline]
    pub fn deletion_queue(&mut self) -> &mut DeletionQueue {
        &mut self.deletion_queue
    }
}

// tools
impl FrameResources {
    /// 等待该 slot 上一次提交完成，然后回收延迟销毁的资源以及 descriptor set
    pub fn wait_and_recycle(&mut self, device: &dyn GfxDevice) -> GfxResult<()> {
        device.wait_and_reset_fence(self.fence)?;
        self.deletion_queue.flush(device);
        device.reset_frame_descriptors(self.label.index())
    }
}
