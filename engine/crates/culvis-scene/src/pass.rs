use std::ops::{Index, IndexMut};

bitflags::bitflags! {
    /// 物体希望参与的 pass
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MeshPassFlags: u8 {
        const FORWARD = 1 << 0;
        const TRANSPARENCY = 1 << 1;
        const DIRECTIONAL_SHADOW = 1 << 2;
    }
}

/// 渲染目的
#[repr(usize)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MeshPassType {
    Forward = 0,
    Transparency = 1,
    DirectionalShadow = 2,
}

impl MeshPassType {
    pub const COUNT: usize = 3;
    pub const ALL: [MeshPassType; Self::COUNT] =
        [MeshPassType::Forward, MeshPassType::Transparency, MeshPassType::DirectionalShadow];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub const fn flag(self) -> MeshPassFlags {
        match self {
            MeshPassType::Forward => MeshPassFlags::FORWARD,
            MeshPassType::Transparency => MeshPassFlags::TRANSPARENCY,
            MeshPassType::DirectionalShadow => MeshPassFlags::DIRECTIONAL_SHADOW,
        }
    }

    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            MeshPassType::Forward => "forward",
            MeshPassType::Transparency => "transparency",
            MeshPassType::DirectionalShadow => "directional-shadow",
        }
    }
}

impl std::fmt::Display for MeshPassType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 每个 pass 一份数据，使用 pass 枚举直接索引
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PerPassData<T> {
    data: [T; MeshPassType::COUNT],
}

// new & init
impl<T> PerPassData<T> {
    #[inline]
    pub fn from_fn(mut f: impl FnMut(MeshPassType) -> T) -> Self {
        Self {
            data: MeshPassType::ALL.map(&mut f),
        }
    }

    #[inline]
    pub fn map<U>(&self, mut f: impl FnMut(MeshPassType, &T) -> U) -> PerPassData<U> {
        PerPassData::from_fn(|pass| f(pass, &self.data[pass.index()]))
    }
}

// tools
impl<T> PerPassData<T> {
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (MeshPassType, &T)> {
        MeshPassType::ALL.into_iter().zip(self.data.iter())
    }

    #[inline]
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (MeshPassType, &mut T)> {
        MeshPassType::ALL.into_iter().zip(self.data.iter_mut())
    }

    #[inline]
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }
}

impl<T> Index<MeshPassType> for PerPassData<T> {
    type Output = T;

    #[inline]
    fn index(&self, pass: MeshPassType) -> &T {
        &self.data[pass.index()]
    }
}

impl<T> IndexMut<MeshPassType> for PerPassData<T> {
    #[inline]
    fn index_mut(&mut self, pass: MeshPassType) -> &mut T {
        &mut self.data[pass.index()]
    }
}
