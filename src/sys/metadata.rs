// clr-rewriter/src/sys/metadata.rs
//
// Vtable prefixes of IMetaDataImport and IMetaDataEmit (cor.h).
// Both interfaces are much longer; only the slots up to the last one the
// agent calls are declared, which is enough to index into the real table.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::ffi::c_void;

use crate::sys::cor::{AddRefFn, QueryInterfaceFn, ReleaseFn, DWORD, GUID, HRESULT, IID, ULONG, WCHAR};
use crate::sys::corprof::{mdMethodDef, mdSignature, mdToken, mdTypeDef, Slot};

pub type PCCOR_SIGNATURE = *const u8;

pub const IID_IMetaDataImport: IID =
    GUID::new(0x7DAC8207, 0xD3AE, 0x4C75, [0x9B, 0x67, 0x92, 0x80, 0x1A, 0x49, 0x7D, 0x44]);
pub const IID_IMetaDataEmit: IID =
    GUID::new(0xBA3FEE4C, 0xECB9, 0x4E41, [0x83, 0xB7, 0x18, 0x3F, 0xA4, 0x1C, 0xD8, 0x59]);

#[repr(C)]
pub struct IMetaDataImportVtbl {
    pub QueryInterface: QueryInterfaceFn,
    pub AddRef: AddRefFn,
    pub Release: ReleaseFn,

    pub CloseEnum: Slot,
    pub CountEnum: Slot,
    pub ResetEnum: Slot,
    pub EnumTypeDefs: Slot,
    pub EnumInterfaceImpls: Slot,
    pub EnumTypeRefs: Slot,
    pub FindTypeDefByName: Slot,
    pub GetScopeProps: Slot,
    pub GetModuleFromScope: Slot,
    pub GetTypeDefProps: unsafe extern "system" fn(
        this: *mut c_void,
        td: mdTypeDef,
        szTypeDef: *mut WCHAR,
        cchTypeDef: ULONG,
        pchTypeDef: *mut ULONG,
        pdwTypeDefFlags: *mut DWORD,
        ptkExtends: *mut mdToken,
    ) -> HRESULT,
    pub GetInterfaceImplProps: Slot,
    pub GetTypeRefProps: Slot,
    pub ResolveTypeRef: Slot,
    pub EnumMembers: Slot,
    pub EnumMembersWithName: Slot,
    pub EnumMethods: Slot,
    pub EnumMethodsWithName: Slot,
    pub EnumFields: Slot,
    pub EnumFieldsWithName: Slot,
    pub EnumParams: Slot,
    pub EnumMemberRefs: Slot,
    pub EnumMethodImpls: Slot,
    pub EnumPermissionSets: Slot,
    pub FindMember: Slot,
    pub FindMethod: Slot,
    pub FindField: Slot,
    pub FindMemberRef: Slot,
    pub GetMethodProps: unsafe extern "system" fn(
        this: *mut c_void,
        mb: mdMethodDef,
        pClass: *mut mdTypeDef,
        szMethod: *mut WCHAR,
        cchMethod: ULONG,
        pchMethod: *mut ULONG,
        pdwAttr: *mut DWORD,
        ppvSigBlob: *mut PCCOR_SIGNATURE,
        pcbSigBlob: *mut ULONG,
        pulCodeRVA: *mut ULONG,
        pdwImplFlags: *mut DWORD,
    ) -> HRESULT,
}

#[repr(C)]
pub struct IMetaDataEmitVtbl {
    pub QueryInterface: QueryInterfaceFn,
    pub AddRef: AddRefFn,
    pub Release: ReleaseFn,

    pub SetModuleProps: Slot,
    pub Save: Slot,
    pub SaveToStream: Slot,
    pub GetSaveSize: Slot,
    pub DefineTypeDef: Slot,
    pub DefineNestedType: Slot,
    pub SetHandler: Slot,
    pub DefineMethod: Slot,
    pub DefineMethodImpl: Slot,
    pub DefineTypeRefByName: Slot,
    pub DefineImportType: Slot,
    pub DefineMemberRef: Slot,
    pub DefineImportMember: Slot,
    pub DefineEvent: Slot,
    pub SetClassLayout: Slot,
    pub DeleteClassLayout: Slot,
    pub SetFieldMarshal: Slot,
    pub DeleteFieldMarshal: Slot,
    pub DefinePermissionSet: Slot,
    pub SetRVA: Slot,
    pub GetTokenFromSig: unsafe extern "system" fn(
        this: *mut c_void,
        pvSig: PCCOR_SIGNATURE,
        cbSig: ULONG,
        pmsig: *mut mdSignature,
    ) -> HRESULT,
}
