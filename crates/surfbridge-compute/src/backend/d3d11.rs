//! Conversions from `windows` COM interfaces to surfbridge handles.
//!
//! Handles are borrowed: the caller keeps the interface alive for as long as
//! any environment or shared surface refers to it.

use surfbridge_core::{Error, Extent, GraphicsDevice, SurfaceHandle};
use windows::Win32::Graphics::Direct3D11::{D3D11_TEXTURE2D_DESC, ID3D11Device, ID3D11Texture2D};
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_NV12;
use windows::core::Interface;

use crate::ComputeResult;

pub fn graphics_device(device: &ID3D11Device) -> GraphicsDevice {
    GraphicsDevice::from_raw(device.as_raw())
}

pub fn surface_handle(texture: &ID3D11Texture2D) -> SurfaceHandle {
    SurfaceHandle::from_raw(texture.as_raw())
}

fn describe(texture: &ID3D11Texture2D) -> D3D11_TEXTURE2D_DESC {
    let mut desc = D3D11_TEXTURE2D_DESC::default();
    // SAFETY: GetDesc only writes the descriptor.
    unsafe { texture.GetDesc(&mut desc) };
    desc
}

/// Extent of an NV12 texture; other formats are rejected.
pub fn nv12_extent(texture: &ID3D11Texture2D) -> ComputeResult<Extent> {
    let desc = describe(texture);
    if desc.Format != DXGI_FORMAT_NV12 {
        return Err(Error::InvalidParameter {
            name: "texture format",
            value: desc.Format.0 as i64,
            reason: "expected DXGI_FORMAT_NV12",
        }
        .into());
    }
    let extent = Extent::new(desc.Width, desc.Height);
    extent.require_even()?;
    Ok(extent)
}

/// Surface handle plus validated extent for an NV12 texture.
pub fn nv12_surface(texture: &ID3D11Texture2D) -> ComputeResult<(SurfaceHandle, Extent)> {
    Ok((surface_handle(texture), nv12_extent(texture)?))
}
