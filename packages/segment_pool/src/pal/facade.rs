use std::fmt::Debug;
use std::io;
use std::num::NonZero;
#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use crate::pal::MockPageMapper;
use crate::pal::{BUILD_TARGET_MAPPER, BuildTargetMapper, PageMapper, Region};

pub(crate) enum MapperFacade {
    Real(&'static BuildTargetMapper),

    #[cfg(test)]
    Mock(Arc<MockPageMapper>),
}

impl MapperFacade {
    pub(crate) fn real() -> Self {
        Self::Real(&BUILD_TARGET_MAPPER)
    }

    #[cfg(test)]
    pub(crate) fn from_mock(mock: MockPageMapper) -> Self {
        Self::Mock(Arc::new(mock))
    }
}

impl PageMapper for MapperFacade {
    fn page_size(&self) -> NonZero<usize> {
        match self {
            Self::Real(m) => m.page_size(),
            #[cfg(test)]
            Self::Mock(m) => m.page_size(),
        }
    }

    fn map(&self, len: NonZero<usize>) -> io::Result<Region> {
        match self {
            Self::Real(m) => m.map(len),
            #[cfg(test)]
            Self::Mock(m) => m.map(len),
        }
    }

    fn unmap(&self, region: Region) {
        match self {
            Self::Real(m) => m.unmap(region),
            #[cfg(test)]
            Self::Mock(m) => m.unmap(region),
        }
    }
}

impl Debug for MapperFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Real(m) => m.fmt(f),
            #[cfg(test)]
            Self::Mock(m) => m.fmt(f),
        }
    }
}
