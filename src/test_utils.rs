/// Sets (or clears) an environment variable for the lifetime of the guard
/// and restores the previous value on drop, panics included.
pub struct EnvVarGuard {
    name: String,
    previous: Option<String>,
}

impl EnvVarGuard {
    pub fn new(
        name: impl Into<String>,
        value: &str,
    ) -> Self {
        let name = name.into();
        let previous = std::env::var(&name).ok();
        std::env::set_var(&name, value);
        Self { name, previous }
    }

    pub fn unset(name: impl Into<String>) -> Self {
        let name = name.into();
        let previous = std::env::var(&name).ok();
        std::env::remove_var(&name);
        Self { name, previous }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        match &self.previous {
            Some(value) => std::env::set_var(&self.name, value),
            None => std::env::remove_var(&self.name),
        }
    }
}
