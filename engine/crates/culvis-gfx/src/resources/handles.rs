use slotmap::new_key_type;

// backend 内部用来找到 allocation 的 key，上层只把它当作不透明的 id
new_key_type! {
    /// Buffer Handle Key
    pub struct GfxBufferHandle;
    /// Image Handle Key
    pub struct GfxImageHandle;
}
