/// Builds a [`Wrapped`](crate::Wrapped) value: `wrap!(value)` is `Arc::new(Mutex::new(value))`.
#[macro_export]
macro_rules! wrap {
    ($name:expr) => {
        std::sync::Arc::new($crate::Mutex::new($name))
    };
}
