//! Callback contract implemented by the application

/// Receives player lifecycle and input events
///
/// With [`DispatchMode::Queued`](crate::DispatchMode::Queued) every call happens
/// on whichever thread drains the [`Dispatcher`](crate::Dispatcher), one call
/// at a time, so implementations can own non-thread-safe game state.
pub trait CommandHandler: Send + 'static {
    fn register(&mut self, player_id: usize, player_name: &str);

    fn deregister(&mut self, player_id: usize);

    /// `extra` is empty when the controller sent no trailing field
    fn key_down(&mut self, player_id: usize, key: &str, extra: &str);

    fn joystick(&mut self, player_id: usize, x: f32, y: f32);

    fn gyro(&mut self, player_id: usize, x: f32, y: f32, z: f32);
}

/// One handler call, captured so it can run later on the consumer thread
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Register { name: String },
    Deregister,
    KeyDown { key: String, extra: Option<String> },
    Joystick { x: f32, y: f32 },
    Gyro { x: f32, y: f32, z: f32 },
}

impl PlayerEvent {
    /// Input events only make sense while the slot still belongs to the
    /// session that produced them.
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            PlayerEvent::KeyDown { .. } | PlayerEvent::Joystick { .. } | PlayerEvent::Gyro { .. }
        )
    }

    pub fn deliver(self, player_id: usize, handler: &mut dyn CommandHandler) {
        match self {
            PlayerEvent::Register { name } => handler.register(player_id, &name),
            PlayerEvent::Deregister => handler.deregister(player_id),
            PlayerEvent::KeyDown { key, extra } => {
                handler.key_down(player_id, &key, extra.as_deref().unwrap_or(""))
            }
            PlayerEvent::Joystick { x, y } => handler.joystick(player_id, x, y),
            PlayerEvent::Gyro { x, y, z } => handler.gyro(player_id, x, y, z),
        }
    }
}
