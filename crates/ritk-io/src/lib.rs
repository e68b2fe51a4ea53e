pub mod nifti_io;

pub use nifti_io::{
    header_from_metadata, metadata_from_header, read_displacement_field, read_nifti, read_nifti_volume,
    write_displacement_field, write_nifti, write_volume, NiftiVolume, INTENT_DISPVECT,
};
