use core::fmt;

/// A generation-stamped slot index, shared by every opaque handle type below. Reusing slot
/// indices (rather than growing forever) requires the generation bump so a stale handle from
/// a completed/removed slot can never alias a newer occupant.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Slot {
    index: u32,
    generation: u32,
}

impl Slot {
    pub fn new(index: u32, generation: u32) -> Self {
        Slot { index, generation }
    }

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

macro_rules! opaque_handle {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Copy, Clone, Eq, PartialEq, Hash)]
        pub struct $name(Slot);

        impl $name {
            pub fn from_slot(slot: Slot) -> Self {
                $name(slot)
            }

            pub fn slot(self) -> Slot {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($name), self.0)
            }
        }
    };
}

opaque_handle!(TaskHandle, "A handle to a scheduled task, returned by `Spawn`.");
opaque_handle!(FutureHandle, "A handle to a single-fire value slot.");
opaque_handle!(SemaphoreHandle, "A handle to a FIFO-fair semaphore.");
opaque_handle!(PromiseHandle, "A handle to the writer side of a `Future`.");
